use crate::models::{BillForm, BillInput, BillReadings, BillResult, FormReadings, MeterReading};
use bigdecimal::{BigDecimal, Zero};
use std::str::FromStr;

/// 读数/单价整数部分最多位数
pub const MAX_INTEGER_DIGITS: i64 = 12;

/// 读数/单价最多小数位
pub const MAX_SCALE: i64 = 6;

/// 数值在允许范围内 (整数位与小数位都有上限)
///
/// 指数形式的大数在比较和相减时会被展开成极长的整数, 计算前必须先检查。
pub fn is_bounded(value: &BigDecimal) -> bool {
    let (_, scale) = value.as_bigint_and_exponent();
    scale <= MAX_SCALE && value.digits() as i64 - scale <= MAX_INTEGER_DIGITS
}

/// 只接受普通十进制文本: 可选符号, 数字, 至多一个小数点, 不接受指数
fn parse_plain_decimal(text: &str) -> Option<BigDecimal> {
    let unsigned = text.strip_prefix(['-', '+']).unwrap_or(text);
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !all_digits(int_part) || !all_digits(frac_part) {
        return None;
    }
    if int_part.trim_start_matches('0').len() as i64 > MAX_INTEGER_DIGITS
        || frac_part.len() as i64 > MAX_SCALE
    {
        return None;
    }
    BigDecimal::from_str(text).ok().filter(is_bounded)
}

/// 读数文本归一化: 空串, 无法解析或超出范围的文本按 0 处理
pub fn normalize_reading(text: &str) -> BigDecimal {
    parse_plain_decimal(text.trim()).unwrap_or_else(BigDecimal::zero)
}

/// 单价文本解析: 空串, 无法解析, 超出范围或负数返回 None (调用方使用默认单价)
pub fn resolve_rate(text: &str) -> Option<BigDecimal> {
    parse_plain_decimal(text.trim()).filter(|rate| *rate >= BigDecimal::zero())
}

/// 电费计算器 (纯函数, 无副作用)
#[derive(Debug, Clone)]
pub struct BillCalculator {
    default_rate: BigDecimal,
}

impl BillCalculator {
    pub fn new(default_rate: BigDecimal) -> Self {
        Self { default_rate }
    }

    pub fn default_rate(&self) -> &BigDecimal {
        &self.default_rate
    }

    /// 计算用量和金额
    ///
    /// 单表: 用量 = 止码 - 起码; 双表: 两块表各自计算后相加, 共用一个单价。
    /// 任意一块表读数无效时返回归零结果, 不报错。
    pub fn compute(&self, input: &BillInput) -> BillResult {
        let rate = input
            .rate
            .clone()
            .unwrap_or_else(|| self.default_rate.clone());
        let meters = input.readings.meters();

        if !meters.iter().all(|m| m.is_valid()) {
            return BillResult::invalid(rate, meters.len());
        }

        let deltas: Vec<BigDecimal> = meters.iter().map(|m| m.delta()).collect();
        let consumption = deltas
            .iter()
            .fold(BigDecimal::zero(), |acc, delta| acc + delta);
        let total = &consumption * &rate;

        BillResult {
            consumption,
            total,
            is_valid: true,
            rate,
            deltas,
        }
    }

    /// 表单文本 -> 计算输入
    pub fn input_from_form(form: &BillForm) -> BillInput {
        let meter = |start: &str, end: &str| {
            MeterReading::new(normalize_reading(start), normalize_reading(end))
        };

        let readings = match &form.readings {
            FormReadings::Single {
                start_units,
                end_units,
            } => BillReadings::Single {
                reading: meter(start_units.as_str(), end_units.as_str()),
            },
            FormReadings::Dual { meter1, meter2 } => BillReadings::Dual {
                meter1: meter(meter1.start_units.as_str(), meter1.end_units.as_str()),
                meter2: meter(meter2.start_units.as_str(), meter2.end_units.as_str()),
            },
        };

        BillInput {
            readings,
            rate: resolve_rate(&form.rate),
        }
    }

    pub fn compute_form(&self, form: &BillForm) -> BillResult {
        self.compute(&Self::input_from_form(form))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FormMeter, MeterType};

    fn dec(v: i64) -> BigDecimal {
        BigDecimal::from(v)
    }

    fn single(start: i64, end: i64, rate: Option<i64>) -> BillInput {
        BillInput {
            readings: BillReadings::Single {
                reading: MeterReading::new(dec(start), dec(end)),
            },
            rate: rate.map(dec),
        }
    }

    fn dual(m1: (i64, i64), m2: (i64, i64), rate: i64) -> BillInput {
        BillInput {
            readings: BillReadings::Dual {
                meter1: MeterReading::new(dec(m1.0), dec(m1.1)),
                meter2: MeterReading::new(dec(m2.0), dec(m2.1)),
            },
            rate: Some(dec(rate)),
        }
    }

    #[test]
    fn test_single_meter_scenario() {
        let calc = BillCalculator::new(dec(8));
        let result = calc.compute(&single(100, 150, Some(5)));
        assert!(result.is_valid);
        assert_eq!(result.consumption, dec(50));
        assert_eq!(result.total, dec(250));
    }

    #[test]
    fn test_single_meter_valid_range() {
        let calc = BillCalculator::new(dec(1));
        for (start, end, rate) in [(0, 0, 3), (0, 7, 2), (99, 100, 11), (5000, 6250, 4)] {
            let result = calc.compute(&single(start, end, Some(rate)));
            assert!(result.is_valid);
            assert_eq!(result.consumption, dec(end - start));
            assert_eq!(result.total, dec((end - start) * rate));
        }
    }

    #[test]
    fn test_single_meter_reversed_readings_zeroed() {
        let calc = BillCalculator::new(dec(5));
        let result = calc.compute(&single(100, 90, Some(5)));
        assert!(!result.is_valid);
        assert_eq!(result.consumption, dec(0));
        assert_eq!(result.total, dec(0));
        assert!(!result.has_positive_consumption());
    }

    #[test]
    fn test_dual_meter_scenario() {
        let calc = BillCalculator::new(dec(1));
        let result = calc.compute(&dual((100, 130), (200, 210), 6));
        assert!(result.is_valid);
        assert_eq!(result.consumption, dec(40));
        assert_eq!(result.total, dec(240));
        assert_eq!(result.deltas, vec![dec(30), dec(10)]);
    }

    #[test]
    fn test_dual_meter_one_invalid_meter() {
        let calc = BillCalculator::new(dec(1));
        let result = calc.compute(&dual((100, 130), (210, 200), 6));
        assert!(!result.is_valid);
        assert_eq!(result.consumption, dec(0));
        assert_eq!(result.total, dec(0));

        let result = calc.compute(&dual((130, 100), (200, 210), 6));
        assert!(!result.is_valid);
    }

    #[test]
    fn test_dual_meter_zero_delta_is_valid_but_not_positive() {
        let calc = BillCalculator::new(dec(1));
        let result = calc.compute(&dual((100, 130), (200, 200), 6));
        assert!(result.is_valid);
        assert_eq!(result.consumption, dec(30));
        assert!(!result.has_positive_consumption());
    }

    #[test]
    fn test_missing_rate_uses_default() {
        let calc = BillCalculator::new(dec(7));
        let result = calc.compute(&single(10, 20, None));
        assert_eq!(result.rate, dec(7));
        assert_eq!(result.total, dec(70));
    }

    #[test]
    fn test_blank_and_garbage_rate_fall_back() {
        let calc = BillCalculator::new(dec(4));
        for rate in ["", "   ", "abc", "-2"] {
            let form = BillForm {
                readings: FormReadings::Single {
                    start_units: "10".to_string(),
                    end_units: "15".to_string(),
                },
                rate: rate.to_string(),
            };
            let result = calc.compute_form(&form);
            assert_eq!(result.rate, dec(4), "rate text {:?}", rate);
            assert_eq!(result.total, dec(20));
        }
    }

    #[test]
    fn test_normalize_reading() {
        assert_eq!(normalize_reading(""), dec(0));
        assert_eq!(normalize_reading("  12 "), dec(12));
        assert_eq!(normalize_reading("12.5"), "12.5".parse::<BigDecimal>().unwrap());
        assert_eq!(normalize_reading("NaN"), dec(0));
        assert_eq!(normalize_reading("twelve"), dec(0));
        assert_eq!(normalize_reading("-3"), dec(-3));
        assert_eq!(normalize_reading(".5"), "0.5".parse::<BigDecimal>().unwrap());
        assert_eq!(normalize_reading("."), dec(0));
    }

    #[test]
    fn test_exponent_and_oversized_text_rejected() {
        for text in ["1e200000000", "1E5", "1e9223372036854775807", "1234567890123", "0.1234567"] {
            assert_eq!(normalize_reading(text), dec(0), "reading text {:?}", text);
            assert_eq!(resolve_rate(text), None, "rate text {:?}", text);
        }
        assert_eq!(normalize_reading("000000000000042"), dec(42));
        assert_eq!(resolve_rate("999999999999.999999").is_some(), true);
    }

    #[test]
    fn test_exponent_reading_in_form_is_invalid_not_expanded() {
        let calc = BillCalculator::new(dec(5));
        let form = BillForm {
            readings: FormReadings::Single {
                start_units: "1".to_string(),
                end_units: "1e200000000".to_string(),
            },
            rate: "2e100000000".to_string(),
        };
        let result = calc.compute_form(&form);
        assert!(!result.is_valid);
        assert_eq!(result.rate, dec(5));
        assert_eq!(result.total, dec(0));
    }

    #[test]
    fn test_is_bounded() {
        assert!(is_bounded(&dec(150)));
        assert!(is_bounded(&"12.125".parse::<BigDecimal>().unwrap()));
        assert!(!is_bounded(&"1e200000000".parse::<BigDecimal>().unwrap()));
        assert!(!is_bounded(&"1e-200000000".parse::<BigDecimal>().unwrap()));
        assert!(!is_bounded(&"1234567890123".parse::<BigDecimal>().unwrap()));
    }

    #[test]
    fn test_form_with_blank_end_is_invalid() {
        let calc = BillCalculator::new(dec(5));
        let form = BillForm {
            readings: FormReadings::Dual {
                meter1: FormMeter {
                    start_units: "100".to_string(),
                    end_units: "130".to_string(),
                },
                meter2: FormMeter {
                    start_units: "200".to_string(),
                    end_units: String::new(),
                },
            },
            rate: "6".to_string(),
        };
        assert!(!calc.compute_form(&form).is_valid);
        assert_eq!(
            BillCalculator::input_from_form(&form).readings.meter_type(),
            MeterType::Dual
        );
    }

    #[test]
    fn test_fractional_total_not_truncated() {
        let calc = BillCalculator::new(dec(0));
        let form = BillForm {
            readings: FormReadings::Single {
                start_units: "0".to_string(),
                end_units: "3.3".to_string(),
            },
            rate: "1.17".to_string(),
        };
        let result = calc.compute_form(&form);
        assert_eq!(result.total, "3.861".parse::<BigDecimal>().unwrap());
        assert_eq!(result.rounded_total(2), "3.86".parse::<BigDecimal>().unwrap());
    }
}
