use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 电表类型: 单表 / 双表 (两块表用量相加)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeterType {
    Single,
    Dual,
}

impl MeterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeterType::Single => "single",
            MeterType::Dual => "dual",
        }
    }
}

impl fmt::Display for MeterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(MeterType::Single),
            "dual" => Ok(MeterType::Dual),
            other => Err(format!("unknown meter type '{}'", other)),
        }
    }
}

/// 一块表的起止读数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    pub start_units: BigDecimal,
    pub end_units: BigDecimal,
}

impl MeterReading {
    pub fn new(start_units: BigDecimal, end_units: BigDecimal) -> Self {
        Self {
            start_units,
            end_units,
        }
    }

    pub fn delta(&self) -> BigDecimal {
        &self.end_units - &self.start_units
    }

    /// 读数非负且止码不小于起码
    pub fn is_valid(&self) -> bool {
        self.start_units >= BigDecimal::zero() && self.end_units >= self.start_units
    }
}

/// 按电表类型区分的读数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "meter_type", rename_all = "lowercase")]
pub enum BillReadings {
    Single {
        reading: MeterReading,
    },
    Dual {
        meter1: MeterReading,
        meter2: MeterReading,
    },
}

impl BillReadings {
    pub fn meter_type(&self) -> MeterType {
        match self {
            BillReadings::Single { .. } => MeterType::Single,
            BillReadings::Dual { .. } => MeterType::Dual,
        }
    }

    pub fn meters(&self) -> Vec<&MeterReading> {
        match self {
            BillReadings::Single { reading } => vec![reading],
            BillReadings::Dual { meter1, meter2 } => vec![meter1, meter2],
        }
    }

    /// 展开为存储列: (表1起码, 表1止码, 表2起码, 表2止码)
    pub fn columns(
        &self,
    ) -> (
        BigDecimal,
        BigDecimal,
        Option<BigDecimal>,
        Option<BigDecimal>,
    ) {
        match self {
            BillReadings::Single { reading } => (
                reading.start_units.clone(),
                reading.end_units.clone(),
                None,
                None,
            ),
            BillReadings::Dual { meter1, meter2 } => (
                meter1.start_units.clone(),
                meter1.end_units.clone(),
                Some(meter2.start_units.clone()),
                Some(meter2.end_units.clone()),
            ),
        }
    }
}

/// 计算输入; rate 为 None 时使用调用方提供的默认单价
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillInput {
    pub readings: BillReadings,
    pub rate: Option<BigDecimal>,
}

/// 计算结果
///
/// 读数无效时 consumption / total 归零, is_valid = false, 由调用方阻止提交。
/// total 保留完整精度, 只在展示时取整。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillResult {
    pub consumption: BigDecimal,
    pub total: BigDecimal,
    pub is_valid: bool,
    /// 实际使用的单价 (已套用默认单价)
    pub rate: BigDecimal,
    /// 每块表的用量, 无效时全部为 0
    pub deltas: Vec<BigDecimal>,
}

impl BillResult {
    pub fn invalid(rate: BigDecimal, meters: usize) -> Self {
        Self {
            consumption: BigDecimal::zero(),
            total: BigDecimal::zero(),
            is_valid: false,
            rate,
            deltas: vec![BigDecimal::zero(); meters],
        }
    }

    /// 每块表用量都大于 0 (批量保存的门槛)
    pub fn has_positive_consumption(&self) -> bool {
        self.is_valid
            && !self.deltas.is_empty()
            && self.deltas.iter().all(|d| *d > BigDecimal::zero())
    }

    pub fn rounded_total(&self, scale: i64) -> BigDecimal {
        self.total.round(scale)
    }
}
