use crate::models::{BillReadings, MeterType};
use serde::{Deserialize, Serialize};

/// 表单里一块表的起止读数 (原始文本)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormMeter {
    #[serde(default)]
    pub start_units: String,
    #[serde(default)]
    pub end_units: String,
}

/// 表单读数, 按电表类型区分
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "meter_type", rename_all = "lowercase")]
pub enum FormReadings {
    Single {
        #[serde(default)]
        start_units: String,
        #[serde(default)]
        end_units: String,
    },
    Dual {
        #[serde(default)]
        meter1: FormMeter,
        #[serde(default)]
        meter2: FormMeter,
    },
}

/// 可编辑字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillField {
    StartUnits,
    EndUnits,
    Meter1Start,
    Meter1End,
    Meter2Start,
    Meter2End,
    Rate,
}

impl FormReadings {
    pub fn blank(meter_type: MeterType) -> Self {
        match meter_type {
            MeterType::Single => FormReadings::Single {
                start_units: String::new(),
                end_units: String::new(),
            },
            MeterType::Dual => FormReadings::Dual {
                meter1: FormMeter::default(),
                meter2: FormMeter::default(),
            },
        }
    }

    /// 用已入账读数填充表单
    pub fn from_readings(readings: &BillReadings) -> Self {
        match readings {
            BillReadings::Single { reading } => FormReadings::Single {
                start_units: reading.start_units.to_string(),
                end_units: reading.end_units.to_string(),
            },
            BillReadings::Dual { meter1, meter2 } => FormReadings::Dual {
                meter1: FormMeter {
                    start_units: meter1.start_units.to_string(),
                    end_units: meter1.end_units.to_string(),
                },
                meter2: FormMeter {
                    start_units: meter2.start_units.to_string(),
                    end_units: meter2.end_units.to_string(),
                },
            },
        }
    }

    /// 新账期: 起码沿用上期止码, 没有上期账单 (或表型不一致) 时留空
    pub fn carried_forward(meter_type: MeterType, prior: Option<&BillReadings>) -> Self {
        match (meter_type, prior) {
            (MeterType::Single, Some(BillReadings::Single { reading })) => FormReadings::Single {
                start_units: reading.end_units.to_string(),
                end_units: String::new(),
            },
            (MeterType::Dual, Some(BillReadings::Dual { meter1, meter2 })) => FormReadings::Dual {
                meter1: FormMeter {
                    start_units: meter1.end_units.to_string(),
                    end_units: String::new(),
                },
                meter2: FormMeter {
                    start_units: meter2.end_units.to_string(),
                    end_units: String::new(),
                },
            },
            _ => Self::blank(meter_type),
        }
    }

    pub fn meter_type(&self) -> MeterType {
        match self {
            FormReadings::Single { .. } => MeterType::Single,
            FormReadings::Dual { .. } => MeterType::Dual,
        }
    }

    /// 读数字段; 与表型不符的字段返回 None
    pub fn field_mut(&mut self, field: BillField) -> Option<&mut String> {
        match (self, field) {
            (FormReadings::Single { start_units, .. }, BillField::StartUnits) => Some(start_units),
            (FormReadings::Single { end_units, .. }, BillField::EndUnits) => Some(end_units),
            (FormReadings::Dual { meter1, .. }, BillField::Meter1Start) => Some(&mut meter1.start_units),
            (FormReadings::Dual { meter1, .. }, BillField::Meter1End) => Some(&mut meter1.end_units),
            (FormReadings::Dual { meter2, .. }, BillField::Meter2Start) => Some(&mut meter2.start_units),
            (FormReadings::Dual { meter2, .. }, BillField::Meter2End) => Some(&mut meter2.end_units),
            _ => None,
        }
    }
}

/// 一行账单表单: 读数 + 单价 (空串表示使用默认单价)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillForm {
    pub readings: FormReadings,
    #[serde(default)]
    pub rate: String,
}

impl BillForm {
    pub fn blank(meter_type: MeterType) -> Self {
        Self {
            readings: FormReadings::blank(meter_type),
            rate: String::new(),
        }
    }

    pub fn field_mut(&mut self, field: BillField) -> Option<&mut String> {
        match field {
            BillField::Rate => Some(&mut self.rate),
            other => self.readings.field_mut(other),
        }
    }
}

/// 当前账期某房间的草稿
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomBillDraft {
    pub room_id: i64,
    pub form: BillForm,
    pub is_edited: bool,
}

impl RoomBillDraft {
    pub fn new(room_id: i64, form: BillForm) -> Self {
        Self {
            room_id,
            form,
            is_edited: false,
        }
    }

    pub fn meter_type(&self) -> MeterType {
        self.form.readings.meter_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MeterReading;
    use bigdecimal::BigDecimal;

    #[test]
    fn test_carried_forward_uses_prior_end() {
        let prior = BillReadings::Dual {
            meter1: MeterReading::new(BigDecimal::from(100), BigDecimal::from(130)),
            meter2: MeterReading::new(BigDecimal::from(200), BigDecimal::from(210)),
        };
        let form = FormReadings::carried_forward(MeterType::Dual, Some(&prior));
        match form {
            FormReadings::Dual { meter1, meter2 } => {
                assert_eq!(meter1.start_units, "130");
                assert_eq!(meter2.start_units, "210");
                assert!(meter1.end_units.is_empty());
            }
            other => panic!("unexpected form {:?}", other),
        }
    }

    #[test]
    fn test_carried_forward_blank_without_prior() {
        let form = FormReadings::carried_forward(MeterType::Single, None);
        assert_eq!(form, FormReadings::blank(MeterType::Single));
    }

    #[test]
    fn test_field_mismatch_is_none() {
        let mut form = BillForm::blank(MeterType::Single);
        assert!(form.field_mut(BillField::Meter2End).is_none());
        assert!(form.field_mut(BillField::Rate).is_some());
        *form.field_mut(BillField::EndUnits).unwrap() = "42".to_string();
        assert_eq!(
            form.readings,
            FormReadings::Single {
                start_units: String::new(),
                end_units: "42".to_string()
            }
        );
    }
}
