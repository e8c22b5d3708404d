// ==========================================
// 并发分配测试
// ==========================================
// 职责: 多连接同时分配同一批库存时, 不重复扣减、库存守恒
// ==========================================

mod test_helpers;

use std::sync::Arc;
use std::thread;
use stock_allocator::engine::{AllocationEngine, AllocationOptions, TaskOrchestrator};
use stock_allocator::repository::SqliteStockLedger;
use test_helpers::{create_test_db, open_test_connection, Seeder};

const WORKERS: usize = 4;

#[test]
fn test_concurrent_requirements_never_double_spend() {
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let mut seeder = Seeder::new(open_test_connection(&db_path).unwrap());

    let a = seeder.part("A");
    let w1 = seeder.warehouse();
    let w2 = seeder.warehouse();
    seeder.catalog.insert_stock_lot(a, w1, 7).unwrap();
    seeder.catalog.insert_stock_lot(a, w2, 5).unwrap();
    let task = seeder.task("T1", 6, 1);
    let req_ids: Vec<_> = (0..WORKERS)
        .map(|_| seeder.catalog.insert_requirement(task, a, 5).unwrap())
        .collect();

    // 每个线程独立连接, 模拟多个进程
    let handles: Vec<_> = req_ids
        .iter()
        .map(|req_id| {
            let db_path = db_path.clone();
            let req_id = *req_id;
            thread::spawn(move || {
                let ledger = Arc::new(SqliteStockLedger::new(&db_path).unwrap());
                let catalog_conn = open_test_connection(&db_path).unwrap();
                let mut req = Seeder::new(catalog_conn)
                    .catalog
                    .find_requirement(req_id)
                    .unwrap();
                AllocationEngine::new(ledger)
                    .allocate_one(&mut req, AllocationOptions::default())
                    .unwrap()
                    .allocated()
            })
        })
        .collect();

    let allocated: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(allocated, 12);
    assert_eq!(seeder.catalog.total_stock().unwrap(), 0);
    assert_eq!(seeder.catalog.total_fulfilled().unwrap(), 12);
    for req_id in req_ids {
        let req = seeder.catalog.find_requirement(req_id).unwrap();
        assert!(req.fulfilled_quantity <= req.planned_quantity);
    }
}

#[test]
fn test_concurrent_allocation_of_same_requirement() {
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let mut seeder = Seeder::new(open_test_connection(&db_path).unwrap());

    let a = seeder.part("A");
    let wh = seeder.warehouse();
    seeder.catalog.insert_stock_lot(a, wh, 6).unwrap();
    seeder.catalog.insert_stock_lot(a, wh, 14).unwrap();
    let task = seeder.task("T1", 6, 1);
    let req_id = seeder.catalog.insert_requirement(task, a, 10).unwrap();

    // 所有线程在分配前读取同一份快照
    let snapshot = seeder.catalog.find_requirement(req_id).unwrap();
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let db_path = db_path.clone();
            let mut req = snapshot.clone();
            thread::spawn(move || {
                let ledger = Arc::new(SqliteStockLedger::new(&db_path).unwrap());
                AllocationEngine::new(ledger)
                    .allocate_one(&mut req, AllocationOptions::default())
                    .unwrap()
                    .allocated()
            })
        })
        .collect();

    let allocated: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let req = seeder.catalog.find_requirement(req_id).unwrap();

    assert_eq!(allocated, 10);
    assert_eq!(req.fulfilled_quantity, 10);
    assert!(req.fulfilled_quantity <= req.planned_quantity);
    assert_eq!(seeder.catalog.total_stock().unwrap(), 10);
}

#[test]
fn test_concurrent_task_runs_conserve_stock() {
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let mut seeder = Seeder::new(open_test_connection(&db_path).unwrap());

    let a = seeder.part("A");
    let b = seeder.part("B");
    seeder.catalog.add_substitute_both_ways(a, b).unwrap();
    let wh = seeder.warehouse();
    seeder.catalog.insert_stock_lot(a, wh, 6).unwrap();
    seeder.catalog.insert_stock_lot(b, wh, 6).unwrap();
    let initial = seeder.catalog.total_stock().unwrap();

    for day in 1..=6 {
        let task = seeder.task(&format!("T{}", day), 6, day);
        seeder.catalog.insert_requirement(task, a, 2).unwrap();
        seeder.catalog.insert_requirement(task, b, 2).unwrap();
    }

    // 两个管理命令同时运行
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let db_path = db_path.clone();
            thread::spawn(move || {
                let ledger = Arc::new(SqliteStockLedger::new(&db_path).unwrap());
                TaskOrchestrator::with_default_policy(ledger)
                    .allocate_open_tasks()
                    .unwrap()
                    .total_allocated()
            })
        })
        .collect();

    let allocated: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let remaining = seeder.catalog.total_stock().unwrap();

    assert_eq!(allocated, 12);
    assert_eq!(initial - remaining, allocated);
    assert_eq!(seeder.catalog.total_fulfilled().unwrap(), allocated);
}
