//! 秒级 cron 表达式
//!
//! 支持 5、6 或 7 个字段：
//! - 5 个：`分 时 日 月 周`（秒固定为 0）
//! - 6 个：`秒 分 时 日 月 周`
//! - 7 个：`秒 分 时 日 月 周 年`
//!
//! 每个字段支持 `*`、`?`、列表 `a,b`、范围 `a-b` 与步长 `*/n`、`a-b/n`、`a/n`。
//! 星期取 0-7，0 与 7 均表示周日。日与周同时受限时任一命中即可。
//!
use crate::error::{DomainError, DomainResult};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use std::collections::BTreeSet;
use std::str::FromStr;

const MIN_YEAR: u32 = 1970;
const MAX_YEAR: u32 = 2099;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    seconds: u64,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    years: BTreeSet<u32>,
    dom_restricted: bool,
    dow_restricted: bool,
}

struct Field {
    values: BTreeSet<u32>,
    restricted: bool,
}

impl Field {
    /// 以 `min` 为第 0 位的位图，仅用于跨度不超过 64 的字段
    fn mask(&self, min: u32) -> u64 {
        self.values.iter().fold(0u64, |bits, v| bits | 1u64 << (v - min))
    }
}

fn parse_field(expr: &str, min: u32, max: u32, name: &str) -> DomainResult<Field> {
    let invalid = |detail: &str| DomainError::Parse {
        reason: format!("invalid cron {name} field {expr:?}: {detail}"),
    };
    let mut values = BTreeSet::new();
    let mut restricted = false;

    for part in expr.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid("bad step"))?;
                if step == 0 {
                    return Err(invalid("step must be positive"));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" || range == "?" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            restricted = true;
            let lo: u32 = lo.parse().map_err(|_| invalid("bad range start"))?;
            let hi: u32 = hi.parse().map_err(|_| invalid("bad range end"))?;
            (lo, hi)
        } else {
            restricted = true;
            let v: u32 = range.parse().map_err(|_| invalid("bad value"))?;
            // `a/n` 表示从 a 开始到上限
            if step.is_some() { (v, max) } else { (v, v) }
        };
        if step.is_some() {
            restricted = true;
        }

        if lo < min || hi > max || lo > hi {
            return Err(invalid("value out of range"));
        }
        values.extend((lo..=hi).step_by(step.unwrap_or(1) as usize));
    }
    Ok(Field { values, restricted })
}

impl FromStr for CronSchedule {
    type Err = DomainError;

    fn from_str(expr: &str) -> DomainResult<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let (sec, rest) = match fields.len() {
            5 => ("0", &fields[..]),
            6 | 7 => (fields[0], &fields[1..]),
            n => {
                return Err(DomainError::Parse {
                    reason: format!("cron expression needs 5, 6 or 7 fields, got {n}"),
                });
            }
        };
        let year = rest.get(5).copied().unwrap_or("*");

        let seconds = parse_field(sec, 0, 59, "second")?;
        let minutes = parse_field(rest[0], 0, 59, "minute")?;
        let hours = parse_field(rest[1], 0, 23, "hour")?;
        let dom = parse_field(rest[2], 1, 31, "day-of-month")?;
        let months = parse_field(rest[3], 1, 12, "month")?;
        let dow = parse_field(rest[4], 0, 7, "day-of-week")?;
        let years = parse_field(year, MIN_YEAR, MAX_YEAR, "year")?;

        // 7 折叠为 0（周日）
        let mut dow_bits = dow.mask(0);
        if dow_bits & (1 << 7) != 0 {
            dow_bits = (dow_bits | 1) & !(1 << 7);
        }

        Ok(CronSchedule {
            seconds: seconds.mask(0),
            minutes: minutes.mask(0),
            hours: hours.mask(0),
            days_of_month: dom.mask(1),
            months: months.mask(1),
            days_of_week: dow_bits,
            years: years.values,
            dom_restricted: dom.restricted,
            dow_restricted: dow.restricted,
        })
    }
}

impl CronSchedule {
    pub fn parse(expr: &str) -> DomainResult<Self> {
        expr.parse()
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month & (1 << (date.day() - 1)) != 0;
        let dow = self.days_of_week & (1 << date.weekday().num_days_from_sunday()) != 0;
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            _ => dom && dow,
        }
    }

    /// 严格晚于 `after` 的下一个触发时间；范围内不存在时返回 `None`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.naive_utc().with_nanosecond(0)? + Duration::seconds(1);
        let mut t: NaiveDateTime = start;

        loop {
            if t.year() < MIN_YEAR as i32 || t.year() > MAX_YEAR as i32 {
                return None;
            }
            if !self.years.contains(&(t.year() as u32)) {
                t = NaiveDate::from_ymd_opt(t.year() + 1, 1, 1)?.and_time(NaiveTime::MIN);
                continue;
            }
            if self.months & (1 << (t.month() - 1)) == 0 {
                t = first_of_next_month(t.date())?.and_time(NaiveTime::MIN);
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_time(NaiveTime::MIN);
                continue;
            }
            if self.hours & (1 << t.hour()) == 0 {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if self.minutes & (1 << t.minute()) == 0 {
                t = t.date().and_hms_opt(t.hour(), t.minute(), 0)? + Duration::minutes(1);
                continue;
            }
            if self.seconds & (1 << t.second()) == 0 {
                t += Duration::seconds(1);
                continue;
            }
            return Some(t.and_utc());
        }
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}
