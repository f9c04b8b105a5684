use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One daily OHLC bar. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adjusted_close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Intraday range relative to the open. Zero when the open is not positive.
    pub fn range_pct(&self) -> f64 {
        if self.open <= 0.0 {
            return 0.0;
        }
        self.range() / self.open
    }
}

/// Date-ordered bar history handed to the pipeline.
#[derive(Debug, Clone, Default)]
pub struct BarSeries {
    pub bars: Vec<Bar>,
}

impl BarSeries {
    /// Sorts by date and drops duplicate dates, keeping the last occurrence.
    pub fn new(mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.date);
        let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(last) if last.date == bar.date => *last = bar,
                _ => deduped.push(bar),
            }
        }
        Self { bars: deduped }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}
