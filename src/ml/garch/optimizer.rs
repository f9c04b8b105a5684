//! Derivative-free Nelder-Mead simplex minimizer.

#[derive(Debug, Clone)]
pub struct NelderMeadResult {
    pub x: Vec<f64>,
    pub fx: f64,
    pub iterations: usize,
    pub converged: bool,
}

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Minimizes `f` starting from `x0`. The initial simplex offsets each
/// coordinate by `steps[i]`. Converges when the spread of objective values
/// across the simplex is below `ftol * (1 + |f_best|)` and no vertex lies
/// further than `xtol` from the best one in any coordinate. Non-finite
/// objective values are treated as +inf.
pub fn nelder_mead<F>(
    f: F,
    x0: &[f64],
    steps: &[f64],
    max_iter: usize,
    ftol: f64,
    xtol: f64,
) -> NelderMeadResult
where
    F: Fn(&[f64]) -> f64,
{
    let n = x0.len();
    let eval = |x: &[f64]| {
        let v = f(x);
        if v.is_finite() {
            v
        } else {
            f64::INFINITY
        }
    };

    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(x0.to_vec());
    for i in 0..n {
        let mut x = x0.to_vec();
        x[i] += steps[i];
        simplex.push(x);
    }
    let mut values: Vec<f64> = simplex.iter().map(|x| eval(x)).collect();

    for iteration in 0..max_iter {
        // Order best to worst
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        let best = values[0];
        let worst = values[n];
        let diameter = simplex[1..]
            .iter()
            .flat_map(|x| x.iter().zip(&simplex[0]).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        if best.is_finite() && (worst - best).abs() <= ftol * (1.0 + best.abs()) && diameter <= xtol {
            return NelderMeadResult {
                x: simplex[0].clone(),
                fx: best,
                iterations: iteration,
                converged: true,
            };
        }

        let centroid: Vec<f64> = (0..n)
            .map(|j| simplex[..n].iter().map(|x| x[j]).sum::<f64>() / n as f64)
            .collect();
        let along = |coef: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(&simplex[n])
                .map(|(c, w)| c + coef * (c - w))
                .collect()
        };

        let reflected = along(REFLECTION);
        let f_reflected = eval(&reflected);

        if f_reflected < values[0] {
            let expanded = along(EXPANSION);
            let f_expanded = eval(&expanded);
            if f_expanded < f_reflected {
                simplex[n] = expanded;
                values[n] = f_expanded;
            } else {
                simplex[n] = reflected;
                values[n] = f_reflected;
            }
            continue;
        }

        if f_reflected < values[n - 1] {
            simplex[n] = reflected;
            values[n] = f_reflected;
            continue;
        }

        let (contracted, f_contracted) = if f_reflected < values[n] {
            let c = along(CONTRACTION);
            let fc = eval(&c);
            (c, fc)
        } else {
            let c = along(-CONTRACTION);
            let fc = eval(&c);
            (c, fc)
        };
        if f_contracted < values[n].min(f_reflected) {
            simplex[n] = contracted;
            values[n] = f_contracted;
            continue;
        }

        // Shrink towards the best vertex
        let best_x = simplex[0].clone();
        for i in 1..=n {
            for j in 0..n {
                simplex[i][j] = best_x[j] + SHRINK * (simplex[i][j] - best_x[j]);
            }
            values[i] = eval(&simplex[i]);
        }
    }

    let best = (0..=n)
        .min_by(|&a, &b| values[a].total_cmp(&values[b]))
        .unwrap_or(0);
    NelderMeadResult {
        x: simplex[best].clone(),
        fx: values[best],
        iterations: max_iter,
        converged: false,
    }
}
