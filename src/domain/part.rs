// ==========================================
// 库存分配系统 - 备件与库存领域模型
// ==========================================
// 职责: 备件主数据、仓库、库存批次
// 红线: 不含数据访问逻辑
// ==========================================

use crate::domain::types::{LotId, PartId, WarehouseId};
use serde::{Deserialize, Serialize};

// ==========================================
// Part - 备件主数据
// ==========================================
// 替代关系 (similar-to) 单独存放于 part_substitute 表,
// 只按 part_id -> substitute_id 正向查询
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: PartId,
    pub name: String,
    pub unit_of_measurement: String, // 计量单位
    pub unit_price: f64,             // 单价
}

// ==========================================
// Warehouse - 仓库
// ==========================================
// 只用于对库存批次分组, 不参与分配逻辑
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
}

// ==========================================
// StockLot - 库存批次
// ==========================================
// 同一 (备件, 仓库) 可有多个批次; 引擎视为按备件聚合的无序池
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLot {
    pub id: LotId,
    pub part_id: PartId,
    pub warehouse_id: WarehouseId,
    pub quantity: u32, // 在库数量 (>= 0)
}

impl StockLot {
    /// 从本批次扣减, 返回实际扣减数量 (不超过在库数量)
    pub fn take(&mut self, wanted: u32) -> u32 {
        let taken = self.quantity.min(wanted);
        self.quantity -= taken;
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_never_goes_negative() {
        let mut lot = StockLot {
            id: LotId(1),
            part_id: PartId(1),
            warehouse_id: WarehouseId(1),
            quantity: 3,
        };

        assert_eq!(lot.take(2), 2);
        assert_eq!(lot.quantity, 1);
        assert_eq!(lot.take(10), 1);
        assert_eq!(lot.quantity, 0);
        assert_eq!(lot.take(1), 0);
    }
}
