// ==========================================
// 库存分配系统 - 分配引擎
// ==========================================
// 职责: 把仓库批次库存分配给计划需求
// 算法: 贪心首次适配; 先本备件批次, 再替代备件批次, 批次按 id 升序
// 红线:
//   - 批次数量不为负, 需求不超分配
//   - 库存守恒: 批次减少量 == 需求增加量
//   - 同一事务内不重复扣减同一批次
// ==========================================

use crate::config::AllocationPolicy;
use crate::domain::{
    AllocationOutcome, BatchReport, DrawSource, LotDraw, PartId, Requirement, StockLot,
};
use crate::engine::error::{AllocationError, AllocationResult};
use crate::repository::{RepositoryResult, StockLedger, StockReader, UnitOfWork};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// ==========================================
// AllocationOptions - 分配选项
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationOptions {
    /// 本备件不足时是否使用替代备件库存
    pub use_substitutes: bool,
    /// 无法全额满足时是否报错并回滚
    pub fail_if_insufficient: bool,
}

impl Default for AllocationOptions {
    fn default() -> Self {
        Self {
            use_substitutes: true,
            fail_if_insufficient: false,
        }
    }
}

impl AllocationOptions {
    pub fn with_substitutes(mut self, enabled: bool) -> Self {
        self.use_substitutes = enabled;
        self
    }

    pub fn with_fail_if_insufficient(mut self, enabled: bool) -> Self {
        self.fail_if_insufficient = enabled;
        self
    }
}

impl From<&AllocationPolicy> for AllocationOptions {
    fn from(policy: &AllocationPolicy) -> Self {
        Self {
            use_substitutes: policy.use_substitutes,
            fail_if_insufficient: policy.fail_if_insufficient,
        }
    }
}

// ==========================================
// 事务内分配 (供引擎与编排器共用)
// ==========================================

/// 在已开启的事务中为单条需求分配库存
///
/// 只使用 `requirement.id`: 已分配数量以事务内加锁重读的存储值为准,
/// 调用方持有的快照可能已过期。
/// 成功时 `requirement` 被更新为分配后的值; 出错时 `requirement` 保持不变,
/// 但事务内已写入的数据需要由调用方回滚 (整个事务返回 Err 即可)。
pub fn allocate_in(
    uow: &mut dyn UnitOfWork,
    requirement: &mut Requirement,
    options: AllocationOptions,
) -> AllocationResult<AllocationOutcome> {
    let mut working = uow.locked_requirement(requirement.id)?;
    if working.fulfilled_quantity != requirement.fulfilled_quantity {
        debug!(
            requirement_id = %working.id,
            stale = requirement.fulfilled_quantity,
            stored = working.fulfilled_quantity,
            "需求快照已过期, 以存储值为准"
        );
    }
    let fulfilled_before = working.fulfilled_quantity;
    let mut draws = Vec::new();

    if working.remaining() == 0 {
        debug!(requirement_id = %working.id, "需求已满足, 跳过");
        return Ok(build_outcome(&working, fulfilled_before, draws));
    }

    let mut touched: Vec<StockLot> = Vec::new();

    // 第一轮: 本备件
    let own_lots = uow.locked_stock_lots_for_parts(&[working.part_id])?;
    consume_lots(&mut working, own_lots, DrawSource::Own, &mut touched, &mut draws);

    // 第二轮: 替代备件 (排除本备件, 防止同一批次被扣两次)
    if options.use_substitutes && working.remaining() > 0 {
        let substitutes: Vec<PartId> = uow
            .substitutes_of(working.part_id)?
            .into_iter()
            .filter(|id| *id != working.part_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if !substitutes.is_empty() {
            let substitute_lots = uow.locked_stock_lots_for_parts(&substitutes)?;
            consume_lots(
                &mut working,
                substitute_lots,
                DrawSource::Substitute,
                &mut touched,
                &mut draws,
            );
        }
    }

    if options.fail_if_insufficient && working.remaining() > 0 {
        warn!(
            requirement_id = %working.id,
            part_id = %working.part_id,
            planned = working.planned_quantity,
            reachable = working.fulfilled_quantity,
            "库存不足, 放弃分配"
        );
        return Err(AllocationError::InsufficientStock {
            requirement_id: working.id,
            part_id: working.part_id,
            required: working.planned_quantity,
            available: working.fulfilled_quantity,
        });
    }

    if !touched.is_empty() {
        uow.update_requirement(&working)?;
        uow.bulk_update_lots(&touched)?;
    }

    let outcome = build_outcome(&working, fulfilled_before, draws);
    debug!(
        requirement_id = %outcome.requirement_id,
        allocated = outcome.allocated(),
        from_substitutes = outcome.allocated_from_substitutes(),
        shortfall = outcome.shortfall(),
        "需求分配完成"
    );

    *requirement = working;
    Ok(outcome)
}

/// 在已开启的事务中按顺序分配多条需求
///
/// 任一需求出错即返回 Err, 调用方的事务应整体回滚。
pub fn allocate_batch_in(
    uow: &mut dyn UnitOfWork,
    requirements: &mut [Requirement],
    options: AllocationOptions,
) -> AllocationResult<BatchReport> {
    let mut report = BatchReport::default();

    for index in 0..requirements.len() {
        let outcome = allocate_in(uow, &mut requirements[index], options)?;
        // 同一需求重复出现时, 之前的条目同步为最新值
        let latest = requirements[index].clone();
        for earlier in requirements[..index].iter_mut() {
            if earlier.id == latest.id {
                *earlier = latest.clone();
            }
        }
        if outcome.is_over_allocated() {
            error!(
                requirement_id = %outcome.requirement_id,
                planned = outcome.planned_quantity,
                fulfilled = outcome.fulfilled_after,
                "需求超分配"
            );
        }
        report.outcomes.push(outcome);
    }

    Ok(report)
}

fn consume_lots(
    requirement: &mut Requirement,
    mut lots: Vec<StockLot>,
    source: DrawSource,
    touched: &mut Vec<StockLot>,
    draws: &mut Vec<LotDraw>,
) {
    lots.sort_by_key(|lot| lot.id);

    for mut lot in lots {
        if requirement.remaining() == 0 {
            break;
        }
        if lot.quantity == 0 || touched.iter().any(|t| t.id == lot.id) {
            continue;
        }

        let taken = lot.take(requirement.remaining());
        requirement.credit(taken);
        draws.push(LotDraw {
            lot_id: lot.id,
            part_id: lot.part_id,
            warehouse_id: lot.warehouse_id,
            taken,
            source,
        });
        touched.push(lot);
    }
}

fn build_outcome(
    requirement: &Requirement,
    fulfilled_before: u32,
    draws: Vec<LotDraw>,
) -> AllocationOutcome {
    AllocationOutcome {
        requirement_id: requirement.id,
        task_id: requirement.task_id,
        part_id: requirement.part_id,
        planned_quantity: requirement.planned_quantity,
        fulfilled_before,
        fulfilled_after: requirement.fulfilled_quantity,
        draws,
    }
}

// ==========================================
// 只读投影 (不加锁)
// ==========================================
// 结果仅为快照: 与随后的加锁分配之间存在竞争窗口

/// 需求可取用的备件集合: 本备件, 以及 (可选) 其正向替代备件
pub fn eligible_parts<R>(
    reader: &R,
    requirement: &Requirement,
    use_substitutes: bool,
) -> RepositoryResult<BTreeSet<PartId>>
where
    R: StockReader + ?Sized,
{
    let mut parts = BTreeSet::new();
    parts.insert(requirement.part_id);
    if use_substitutes {
        parts.extend(reader.substitutes_of(requirement.part_id)?);
    }
    Ok(parts)
}

pub fn total_available_stock<R>(
    reader: &R,
    requirement: &Requirement,
    use_substitutes: bool,
) -> RepositoryResult<u64>
where
    R: StockReader + ?Sized,
{
    let parts = eligible_parts(reader, requirement, use_substitutes)?;
    reader.available_quantity(&parts)
}

/// 多条需求的可用库存: 先取备件集合并集, 共享库存只计一次
pub fn total_available_stock_batch<R>(
    reader: &R,
    requirements: &[Requirement],
    use_substitutes: bool,
) -> RepositoryResult<u64>
where
    R: StockReader + ?Sized,
{
    let mut parts = BTreeSet::new();
    for requirement in requirements {
        parts.extend(eligible_parts(reader, requirement, use_substitutes)?);
    }
    reader.available_quantity(&parts)
}

/// 可用库存 (含替代备件) 是否覆盖计划数量
///
/// 比较的是 planned_quantity 而不是尚需数量, 已部分满足的需求判断偏保守。
pub fn is_fully_allocatable<R>(reader: &R, requirement: &Requirement) -> RepositoryResult<bool>
where
    R: StockReader + ?Sized,
{
    let available = total_available_stock(reader, requirement, true)?;
    Ok(available >= requirement.planned_quantity as u64)
}

/// 逐条判断, 不考虑需求之间对共享库存的竞争
pub fn can_fully_allocate_all<R>(reader: &R, requirements: &[Requirement]) -> RepositoryResult<bool>
where
    R: StockReader + ?Sized,
{
    for requirement in requirements {
        if !is_fully_allocatable(reader, requirement)? {
            return Ok(false);
        }
    }
    Ok(true)
}

// ==========================================
// AllocationEngine - 分配引擎
// ==========================================
pub struct AllocationEngine<S>
where
    S: StockLedger,
{
    ledger: Arc<S>,
}

impl<S> AllocationEngine<S>
where
    S: StockLedger,
{
    pub fn new(ledger: Arc<S>) -> Self {
        Self { ledger }
    }

    /// 为单条需求分配库存 (独立事务)
    ///
    /// 事务提交后才回写 `requirement`; 出错时 `requirement` 与存储均保持原值。
    pub fn allocate_one(
        &self,
        requirement: &mut Requirement,
        options: AllocationOptions,
    ) -> AllocationResult<AllocationOutcome> {
        let mut draft = requirement.clone();
        let outcome = self
            .ledger
            .unit_of_work(|uow| allocate_in(uow, &mut draft, options))?;
        *requirement = draft;
        Ok(outcome)
    }

    /// 按给定顺序分配多条需求 (同一事务, 全部成功或全部回滚)
    pub fn allocate_batch(
        &self,
        requirements: &mut [Requirement],
        options: AllocationOptions,
    ) -> AllocationResult<BatchReport> {
        let mut drafts = requirements.to_vec();
        let report = self
            .ledger
            .unit_of_work(|uow| allocate_batch_in(uow, &mut drafts, options))?;
        requirements.clone_from_slice(&drafts);

        info!(
            requirements = report.outcomes.len(),
            allocated = report.total_allocated(),
            touched_lots = report.touched_lots(),
            fully_allocated = report.is_fully_allocated(),
            under_allocated = report.under_allocated().len(),
            "批量分配完成"
        );
        Ok(report)
    }

    pub fn is_fully_allocatable(&self, requirement: &Requirement) -> AllocationResult<bool> {
        Ok(is_fully_allocatable(self.ledger.as_ref(), requirement)?)
    }

    pub fn can_fully_allocate_all(&self, requirements: &[Requirement]) -> AllocationResult<bool> {
        Ok(can_fully_allocate_all(self.ledger.as_ref(), requirements)?)
    }

    pub fn total_available_stock(
        &self,
        requirement: &Requirement,
        use_substitutes: bool,
    ) -> AllocationResult<u64> {
        Ok(total_available_stock(
            self.ledger.as_ref(),
            requirement,
            use_substitutes,
        )?)
    }

    pub fn total_available_stock_batch(
        &self,
        requirements: &[Requirement],
        use_substitutes: bool,
    ) -> AllocationResult<u64> {
        Ok(total_available_stock_batch(
            self.ledger.as_ref(),
            requirements,
            use_substitutes,
        )?)
    }
}
