// Admin command: allocate stock to every open task, earliest expected date first.
//
// Usage:
//   cargo run --bin allocate-details -- [db_path]
//
// Without db_path, STOCK_ALLOCATOR_DB_PATH or the user data dir is used.

use anyhow::Context;
use stock_allocator::config::ConfigManager;
use stock_allocator::db::{ensure_schema, open_sqlite_connection, resolve_db_path};
use stock_allocator::engine::TaskOrchestrator;
use stock_allocator::logging;
use stock_allocator::repository::SqliteStockLedger;
use std::sync::{Arc, Mutex};
use tracing::info;

fn main() -> anyhow::Result<()> {
    logging::init();

    let arg = std::env::args().nth(1);
    let db_path = resolve_db_path(arg.as_deref());
    info!(db_path = %db_path, version = stock_allocator::VERSION, "启动库存分配");

    let conn = open_sqlite_connection(&db_path)
        .with_context(|| format!("打开数据库失败: {}", db_path))?;
    ensure_schema(&conn).context("初始化表结构失败")?;
    let conn = Arc::new(Mutex::new(conn));

    let config = ConfigManager::from_connection(conn.clone())?;
    let policy = config.allocation_policy()?;
    info!(snapshot = %config.get_config_snapshot()?, "配置快照");

    let ledger = Arc::new(SqliteStockLedger::from_connection(conn));
    let orchestrator = TaskOrchestrator::new(ledger, policy);
    let report = orchestrator.allocate_open_tasks()?;

    println!("run_id={}", report.run_id);
    let touched_lots: usize = report
        .allocations
        .iter()
        .map(|a| a.report.touched_lots())
        .sum();
    println!(
        "completed={} in_progress={} skipped={} allocated={} lots={}",
        report.completed().len(),
        report.in_progress().len(),
        report.skipped().len(),
        report.total_allocated(),
        touched_lots
    );
    for allocation in &report.allocations {
        for shortfall in allocation.report.under_allocated() {
            println!(
                "task={} requirement={} part={} missing={}",
                allocation.task_id, shortfall.requirement_id, shortfall.part_id, shortfall.missing
            );
        }
    }

    Ok(())
}
