use engine_bench::report::QuerySummary;
use engine_bench::report_writer::{ReportFiles, totals_line};
use engine_bench::validator::{ComparisonKind, Verdict};
use engine_bench::{Benchmark, ComparisonReport, RowCount, RunStatus, row_counts_match};

const RULE: &str = "═══════════════════════════════════════════════════════════════";
const THIN: &str = "───────────────────────────────────────────────────────────────";

pub fn print_banner() {
    println!("╔═══════════════════════════════════════════════════════════════╗");
    println!("║   Analytical Engine Comparison                                ║");
    println!("║   ClickHouse / CedarDB / PostgreSQL                           ║");
    println!("╚═══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn print_plan(benchmark: &Benchmark) {
    println!("Engines:");
    for engine in benchmark.engines() {
        println!(
            "  {:<14} {:<10} {}",
            engine.name(),
            engine.profile.dialect(),
            engine.profile.display_url()
        );
    }
    println!("Queries:    {}", benchmark.query_ids().join(", "));
    println!("Schedule:   {:?}", benchmark.schedule());
    println!();
}

pub fn print_report(report: &ComparisonReport) {
    for query in report.queries() {
        print_query(query);
    }

    println!("{}", RULE);
    println!("{}", totals_line(report.totals()));
}

fn print_query(query: &QuerySummary) {
    println!("{}", RULE);
    println!("{}", query.query);
    println!("{}", THIN);
    println!(
        "  {:<4} {:<14} {:>12} {:>12}  {:<16}",
        "rank", "engine", "ms", "rows", "status"
    );

    for run in &query.runs {
        let rank = run.rank.map(|r| format!("#{}", r)).unwrap_or_default();
        let duration = run
            .duration_ms
            .map(|ms| format!("{:.2}", ms))
            .unwrap_or_else(|| "-".to_string());
        let rows = run
            .row_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<4} {:<14} {:>12} {:>12}  {:<16}",
            rank,
            run.engine,
            duration,
            rows,
            run.status.as_str()
        );
        if run.status != RunStatus::Ok
            && let Some(error) = &run.error
        {
            println!("       {}", error.chars().take(90).collect::<String>());
        }
    }

    let Some(validation) = &query.validation else {
        return;
    };
    for comparison in &validation.comparisons {
        let kind = match comparison.kind {
            ComparisonKind::Exact => "exact".to_string(),
            ComparisonKind::Tolerance { relative_pct } => format!("±{}%", relative_pct),
        };
        match &comparison.verdict {
            Verdict::Match => {}
            Verdict::Divergence { detail } => println!(
                "  ✗ {} vs {} ({}): {}",
                comparison.engine, comparison.baseline, kind, detail
            ),
        }
    }
    if !validation.has_divergence() && !validation.comparisons.is_empty() {
        println!("  ✓ results match across {} engines", validation.comparisons.len() + 1);
    }
}

pub fn print_files(files: &ReportFiles) {
    println!();
    println!("JSON report:  {}", files.json.display());
    println!("CSV report:   {}", files.csv.display());
    if let Some(plans) = &files.plans {
        println!("Plans:        {}", plans.display());
    }
}

pub fn print_row_counts(table: &str, counts: &[RowCount]) {
    println!("{}", RULE);
    println!("Row counts for '{}'", table);
    println!("{}", THIN);
    for count in counts {
        match (count.rows, &count.error) {
            (Some(rows), _) => println!("  {:<14} {:>16}", count.engine, rows),
            (None, Some(error)) => println!("  {:<14} {:>16}  {}", count.engine, "error", error),
            (None, None) => println!("  {:<14} {:>16}", count.engine, "-"),
        }
    }
    println!("{}", THIN);
    if row_counts_match(counts) {
        println!("  ✓ row counts match");
    } else {
        println!("  ✗ row counts differ; fix the ingestion before benchmarking");
    }
}
