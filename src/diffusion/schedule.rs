use std::{f64::consts::FRAC_PI_2, fmt, str::FromStr};

use candle_core::{Device, Tensor};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetaSchedule {
    /// DDPM linear betas, rescaled so that any step count covers the 1000-step range.
    Linear,
    /// Nichol & Dhariwal squared-cosine `alpha_bar`.
    Cosine,
}

impl FromStr for BetaSchedule {
    type Err = Error;
    fn from_str(s: &str) -> std::result::Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "cosine" => Ok(Self::Cosine),
            _ => Err(Error::UnknownSchedule(s.to_owned())),
        }
    }
}

impl fmt::Display for BetaSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Linear => "linear",
            Self::Cosine => "cosine",
        })
    }
}

const MAX_BETA: f64 = 0.999;

/// DDPM posterior `q(x_{t-1} | x_t, x_0) = N(x0_coef * x_0 + xt_coef * x_t, variance)`.
#[derive(Debug, Clone, Copy)]
pub struct Posterior {
    pub x0_coef: f64,
    pub xt_coef: f64,
    pub variance: f64,
}

/// Precomputed per-timestep coefficients. Timesteps are 1-based: `t` in `[1, T]`.
#[derive(Debug, Clone)]
pub struct NoiseSchedule {
    kind: BetaSchedule,
    betas: Vec<f64>,
    alpha_bars: Vec<f64>,
}

impl NoiseSchedule {
    pub fn new(kind: BetaSchedule, num_timesteps: usize) -> Self {
        let betas = match kind {
            BetaSchedule::Linear => {
                let scale = 1000.0 / num_timesteps as f64;
                let start = scale * 1e-4;
                let end = (scale * 0.02).min(MAX_BETA);
                let denom = num_timesteps.saturating_sub(1).max(1) as f64;
                (0..num_timesteps)
                    .map(|i| start + (end - start) * i as f64 / denom)
                    .collect::<Vec<_>>()
            }
            BetaSchedule::Cosine => {
                let s = 0.008;
                let f = |t: usize| {
                    let x = (t as f64 / num_timesteps as f64 + s) / (1.0 + s) * FRAC_PI_2;
                    x.cos().powi(2)
                };
                (1..=num_timesteps)
                    .map(|t| (1.0 - f(t) / f(t - 1)).min(MAX_BETA))
                    .collect()
            }
        };
        let alpha_bars = betas
            .iter()
            .scan(1.0, |acc, beta| {
                *acc *= 1.0 - beta;
                Some(*acc)
            })
            .collect();
        Self {
            kind,
            betas,
            alpha_bars,
        }
    }

    pub fn kind(&self) -> BetaSchedule {
        self.kind
    }

    pub fn num_timesteps(&self) -> usize {
        self.betas.len()
    }

    fn index(&self, t: usize) -> Result<usize> {
        if t == 0 || t > self.num_timesteps() {
            return Err(Error::TimestepOutOfRange {
                t,
                num_timesteps: self.num_timesteps(),
            });
        }
        Ok(t - 1)
    }

    pub fn beta(&self, t: usize) -> Result<f64> {
        Ok(self.betas[self.index(t)?])
    }

    pub fn alpha_bar(&self, t: usize) -> Result<f64> {
        Ok(self.alpha_bars[self.index(t)?])
    }

    /// `alpha_bar_{t-1}`, with `alpha_bar_0 = 1`.
    pub fn alpha_bar_prev(&self, t: usize) -> Result<f64> {
        let i = self.index(t)?;
        Ok(if i == 0 { 1.0 } else { self.alpha_bars[i - 1] })
    }

    /// `sqrt(alpha_bar_t) * x0 + sqrt(1 - alpha_bar_t) * eps` for a given `eps`.
    pub fn forward_noise_with(&self, x0: &Tensor, t: usize, eps: &Tensor) -> Result<Tensor> {
        let alpha_bar = self.alpha_bar(t)?;
        let signal = x0.affine(alpha_bar.sqrt(), 0.0)?;
        let noise = eps.affine((1.0 - alpha_bar).sqrt(), 0.0)?;
        Ok((signal + noise)?)
    }

    /// Draws `eps ~ N(0, I)` from `rng` and returns `(x_t, eps)`.
    pub fn forward_noise<R: Rng>(
        &self,
        x0: &Tensor,
        t: usize,
        rng: &mut R,
    ) -> Result<(Tensor, Tensor)> {
        let eps = standard_normal(x0.dims(), x0.device(), rng)?;
        let x_t = self.forward_noise_with(x0, t, &eps)?;
        Ok((x_t, eps))
    }

    /// Inverts the forward process for a predicted noise.
    pub fn x0_from_eps(&self, x_t: &Tensor, t: usize, eps: &Tensor) -> Result<Tensor> {
        let alpha_bar = self.alpha_bar(t)?;
        let scaled = (x_t - eps.affine((1.0 - alpha_bar).sqrt(), 0.0)?)?;
        Ok(scaled.affine(1.0 / alpha_bar.sqrt(), 0.0)?)
    }

    pub fn posterior(&self, t: usize) -> Result<Posterior> {
        let beta = self.beta(t)?;
        let alpha_bar = self.alpha_bar(t)?;
        let alpha_bar_prev = self.alpha_bar_prev(t)?;
        Ok(Posterior {
            x0_coef: alpha_bar_prev.sqrt() * beta / (1.0 - alpha_bar),
            xt_coef: (1.0 - beta).sqrt() * (1.0 - alpha_bar_prev) / (1.0 - alpha_bar),
            variance: beta * (1.0 - alpha_bar_prev) / (1.0 - alpha_bar),
        })
    }
}

/// `N(0, I)` tensor drawn from a caller-owned RNG, so runs are reproducible from one seed.
pub fn standard_normal<R: Rng>(
    dims: &[usize],
    device: &Device,
    rng: &mut R,
) -> Result<Tensor> {
    let len = dims.iter().product::<usize>();
    let data: Vec<f32> = (0..len).map(|_| rng.sample(StandardNormal)).collect();
    Ok(Tensor::from_vec(data, dims, device)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn linear_betas_increase_and_alpha_bar_decreases() {
        let schedule = NoiseSchedule::new(BetaSchedule::Linear, 50);
        for t in 2..=50 {
            assert!(schedule.beta(t).unwrap() >= schedule.beta(t - 1).unwrap());
            assert!(schedule.alpha_bar(t).unwrap() < schedule.alpha_bar(t - 1).unwrap());
        }
        assert!((schedule.beta(1).unwrap() - 20.0 * 1e-4).abs() < 1e-12);
    }

    #[test]
    fn cosine_schedule_is_bounded() {
        let schedule = NoiseSchedule::new(BetaSchedule::Cosine, 100);
        for t in 1..=100 {
            let beta = schedule.beta(t).unwrap();
            assert!(beta > 0.0 && beta <= MAX_BETA);
        }
    }

    #[test]
    fn timestep_range_is_checked() {
        let schedule = NoiseSchedule::new(BetaSchedule::Linear, 10);
        assert!(matches!(
            schedule.alpha_bar(0),
            Err(Error::TimestepOutOfRange { t: 0, num_timesteps: 10 })
        ));
        assert!(schedule.alpha_bar(11).is_err());
        assert!(schedule.alpha_bar(10).is_ok());
        assert_eq!(schedule.alpha_bar_prev(1).unwrap(), 1.0);
    }

    #[test]
    fn forward_noise_matches_closed_form_moments() -> Result<()> {
        let device = Device::Cpu;
        let schedule = NoiseSchedule::new(BetaSchedule::Linear, 100);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let x0 = Tensor::ones(20_000, DType::F32, &device)?;
        for t in [1, 10, 50, 100] {
            let (x_t, _) = schedule.forward_noise(&x0, t, &mut rng)?;
            let values = x_t.to_vec1::<f32>()?;
            let n = values.len() as f64;
            let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
            let var = values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
            let alpha_bar = schedule.alpha_bar(t)?;
            assert!((mean - alpha_bar.sqrt()).abs() < 0.03, "t={t} mean={mean}");
            assert!((var - (1.0 - alpha_bar)).abs() < 0.03, "t={t} var={var}");
        }
        Ok(())
    }

    #[test]
    fn forward_noise_is_seeded() -> Result<()> {
        let schedule = NoiseSchedule::new(BetaSchedule::Linear, 10);
        let x0 = Tensor::zeros(8, DType::F32, &Device::Cpu)?;
        let draw = |seed| -> Result<Vec<f32>> {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            Ok(schedule.forward_noise(&x0, 5, &mut rng)?.0.to_vec1::<f32>()?)
        };
        assert_eq!(draw(3)?, draw(3)?);
        assert_ne!(draw(3)?, draw(4)?);
        Ok(())
    }

    #[test]
    fn eps_inversion_recovers_x0() -> Result<()> {
        let device = Device::Cpu;
        let schedule = NoiseSchedule::new(BetaSchedule::Linear, 20);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let x0 = Tensor::new(&[0f32, 1., 1., 0.], &device)?;
        let (x_t, eps) = schedule.forward_noise(&x0, 12, &mut rng)?;
        let back = schedule.x0_from_eps(&x_t, 12, &eps)?.to_vec1::<f32>()?;
        for (a, b) in back.iter().zip([0f32, 1., 1., 0.]) {
            assert!((a - b).abs() < 1e-4);
        }
        Ok(())
    }
}
