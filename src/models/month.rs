use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 账期 (月份), 文本格式 YYYY-MM
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BillingMonth {
    year: i32,
    month: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid billing month '{0}', expected YYYY-MM")]
pub struct ParseMonthError(pub String);

impl BillingMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(Self::from_date)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// 上一个账期
    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// 下一个账期
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// 当前账期 (本地时间)
    pub fn current() -> Self {
        Self::from_date(chrono::Local::now().date_naive())
    }
}

impl fmt::Display for BillingMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for BillingMonth {
    type Err = ParseMonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        // 只接受 YYYY-MM, 拼上日期后交给 chrono 校验
        if trimmed.len() != 7 {
            return Err(ParseMonthError(s.to_string()));
        }
        NaiveDate::parse_from_str(&format!("{}-01", trimmed), "%Y-%m-%d")
            .map(Self::from_date)
            .map_err(|_| ParseMonthError(s.to_string()))
    }
}

impl TryFrom<String> for BillingMonth {
    type Error = ParseMonthError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BillingMonth> for String {
    fn from(month: BillingMonth) -> Self {
        month.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let m: BillingMonth = "2024-03".parse().unwrap();
        assert_eq!(m.year(), 2024);
        assert_eq!(m.month(), 3);
        assert_eq!(m.to_string(), "2024-03");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!("2024-13".parse::<BillingMonth>().is_err());
        assert!("2024-3".parse::<BillingMonth>().is_err());
        assert!("march".parse::<BillingMonth>().is_err());
    }

    #[test]
    fn test_previous_wraps_year() {
        let jan = BillingMonth::new(2024, 1).unwrap();
        assert_eq!(jan.previous(), BillingMonth::new(2023, 12).unwrap());
        assert!(jan.previous() < jan);
        assert_eq!(jan.previous().next(), jan);
    }

    #[test]
    fn test_serde_as_string() {
        let m = BillingMonth::new(2023, 11).unwrap();
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, "\"2023-11\"");
        let back: BillingMonth = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
