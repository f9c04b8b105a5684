/// Exponential moving average seeded with the simple mean of the first
/// `period` values. Returns `None` until the seed window is full.
#[derive(Debug, Clone)]
pub struct EMA {
    period: usize,
    multiplier: f64,
    value: Option<f64>,
    count: usize,
    sum: f64,
}

impl EMA {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        let multiplier = 2.0 / (period as f64 + 1.0);
        Self {
            period,
            multiplier,
            value: None,
            count: 0,
            sum: 0.0,
        }
    }

    pub fn update(&mut self, value: f64) -> Option<f64> {
        self.count += 1;

        if self.count < self.period {
            self.sum += value;
            return None;
        } else if self.count == self.period {
            self.sum += value;
            self.value = Some(self.sum / self.period as f64);
            return self.value;
        }

        if let Some(prev) = self.value {
            self.value = Some((value - prev) * self.multiplier + prev);
        }

        self.value
    }
}
