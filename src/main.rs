use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};

use rxsignal::analysis::{build_watchlist, ExposureReport};
use rxsignal::config::EngineConfig;
use rxsignal::events::{EventKind, EventLog, RiskEvent};
use rxsignal::features::{FeatureAssembler, PriceHistory};
use rxsignal::forecast::{forecast_with_retry, ForecastDistribution, StaticForecaster};
use rxsignal::graph::{NodeType, Relation, SupplyGraph};
use rxsignal::propagation::RiskPropagator;
use rxsignal::simulation::{simulate, Portfolio, PortfolioItem};
use rxsignal::types::{Date, EventId, NodeId, PortfolioId};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut config = EngineConfig::default();
    let mut as_of = Date(180);
    let mut trail_path: Option<String> = None;
    let mut report_path: Option<String> = None;
    let mut quiet = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--seed" => {
                i += 1;
                config.simulation.seed = args[i].parse().expect("--seed requires a u64");
            }
            "--scenarios" => {
                i += 1;
                config.simulation.num_scenarios =
                    args[i].parse().expect("--scenarios requires a positive integer");
            }
            "--as-of" => {
                i += 1;
                as_of = Date(args[i].parse().expect("--as-of requires a day number"));
            }
            "--trail" => {
                i += 1;
                trail_path = Some(args[i].clone());
            }
            "--report" => {
                i += 1;
                report_path = Some(args[i].clone());
            }
            "--quiet" => quiet = true,
            _ => {}
        }
        i += 1;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(if quiet { "error" } else { "info" })),
        )
        .with_writer(std::io::stderr)
        .init();

    // ── Demo topology: one corporate family, two plants, two products ──────
    let mut graph = SupplyGraph::new();
    graph.add_node(NodeId(1), NodeType::Corporation, "Meridian Pharma Group");
    graph.add_node(NodeId(2), NodeType::Facility, "Vadodara API Plant");
    graph.add_node(NodeId(3), NodeType::Facility, "Leipzig Finishing Plant");
    graph.add_node(NodeId(4), NodeType::Ingredient, "Amoxicillin API");
    graph.add_node(NodeId(5), NodeType::Ingredient, "Clavulanate API");
    graph.add_node(NodeId(6), NodeType::Product, "Amoxicillin 500mg Capsule");
    graph.add_node(NodeId(7), NodeType::Product, "Amox/Clav 875mg Tablet");

    let epoch = Date(0);
    let edges = [
        (1, 2, Relation::Owns, 1.0),
        (1, 3, Relation::Owns, 0.6), // partial stake
        (2, 4, Relation::Makes, 1.0),
        (2, 5, Relation::Makes, 1.0),
        (3, 6, Relation::Operates, 1.0),
        (4, 6, Relation::Contains, 1.0),
        (4, 7, Relation::Contains, 0.7),
        (5, 7, Relation::Contains, 0.3),
    ];
    for (from, to, relation, weight) in edges {
        graph
            .add_edge(NodeId(from), NodeId(to), relation, weight, epoch)
            .expect("demo nodes exist");
    }

    // ── Price history: weekly observations for both products ───────────────
    let mut prices = PriceHistory::new();
    for week in 0..26 {
        let d = Date(week * 7);
        prices.record(NodeId(6), d, 5.00 + week as f64 * 0.02);
        prices.record(NodeId(7), d, 11.40 + week as f64 * 0.05);
    }

    // ── Events: an inspection failure, a shortage, and its resolution ──────
    let mut log = EventLog::new();
    let events = vec![
        RiskEvent {
            id: EventId(1),
            source_entity_id: NodeId(2),
            kind: EventKind::InspectionFailure,
            severity: 9.0,
            observed_at: Date(60),
            decay: None,
        },
        RiskEvent {
            id: EventId(2),
            source_entity_id: NodeId(5),
            kind: EventKind::Shortage,
            severity: 6.0,
            observed_at: Date(90),
            decay: None,
        },
        RiskEvent {
            id: EventId(3),
            source_entity_id: NodeId(5),
            kind: EventKind::Resolved,
            severity: 0.0,
            observed_at: Date(150),
            decay: None,
        },
    ];
    for e in &events {
        log.record(e.clone());
    }

    let mut propagator = RiskPropagator::new(config.propagation.clone());
    let summary = propagator.propagate_batch(&mut graph, &log, &events);

    if let Some(path) = trail_path {
        let file = File::create(&path).unwrap_or_else(|e| panic!("failed to create {path}: {e}"));
        let mut writer = BufWriter::new(file);
        for record in propagator.trail() {
            serde_json::to_writer(&mut writer, record).expect("serialize");
            writeln!(writer).expect("newline");
        }
        if !quiet {
            println!("{} propagation records → {path}", propagator.trail().len());
        }
    }

    // ── Feature rows as of the cutoff (fed to the external model) ──────────
    let assembler = FeatureAssembler::new(&graph, &prices);
    let batch = assembler.assemble_batch(&[(NodeId(6), as_of), (NodeId(7), as_of)]);
    let (rows, excluded) = batch.summary();

    // ── Forecasts + valuation ──────────────────────────────────────────────
    let mut model = StaticForecaster::new();
    model.insert(NodeId(6), ForecastDistribution::from_p10_p50_p90(5.10, 5.60, 8.90));
    model.insert(NodeId(7), ForecastDistribution::from_p10_p50_p90(11.80, 12.60, 14.20));

    let portfolio = Portfolio {
        id: PortfolioId(1),
        items: vec![
            PortfolioItem { entity_id: NodeId(6), current_price: 5.36, volume: 120_000.0 },
            PortfolioItem { entity_id: NodeId(7), current_price: 12.30, volume: 45_000.0 },
        ],
    };
    let mut forecasts = HashMap::new();
    for item in &portfolio.items {
        match forecast_with_retry(&model, item.entity_id, 90, &config.retry) {
            Ok(dist) => {
                forecasts.insert(item.entity_id, dist);
            }
            Err(err) => eprintln!("forecast unavailable for {:?}: {err}", item.entity_id),
        }
    }

    let result = simulate(&portfolio, &forecasts, as_of, &config.simulation);
    let watchlist = build_watchlist(&graph, &portfolio, &forecasts, &result);

    if !quiet {
        println!(
            "propagated {} events ({} skipped, {} records); {rows} feature rows ({excluded} excluded)",
            summary.propagated + summary.resolutions,
            summary.skipped,
            summary.records_written,
        );
        println!(
            "expected loss ${:.2}, VaR({:.0}) ${:.2} over {} scenarios",
            result.expected_loss,
            config.simulation.var_percentile,
            result.value_at_risk,
            result.num_scenarios,
        );
        println!("watchlist:");
        for entry in &watchlist {
            println!(
                "  {:<28} risk {:>4.2}  upside ${:>5.2}  E[loss] ${:>10.2}  share {:>5.1}%",
                entry.name,
                entry.current_risk_score,
                entry.forecast_upside,
                entry.expected_loss_contribution,
                entry.loss_share * 100.0,
            );
        }
    }

    if let Some(path) = report_path {
        let report = ExposureReport { result, watchlist };
        let file = File::create(&path).unwrap_or_else(|e| panic!("failed to create {path}: {e}"));
        serde_json::to_writer_pretty(BufWriter::new(file), &report).expect("serialize report");
        if !quiet {
            println!("report → {path}");
        }
    }
}
