use candle_nn::Optimizer;

/// Multiplies the learning rate by `gamma` every `step_size` optimizer steps.
#[derive(Debug, Clone)]
pub struct StepLr {
    base_lr: f64,
    step_size: usize,
    gamma: f64,
    steps: usize,
}
impl StepLr {
    pub fn new(base_lr: f64, step_size: usize, gamma: f64) -> Self {
        Self {
            base_lr,
            step_size: step_size.max(1),
            gamma,
            steps: 0,
        }
    }
    pub fn lr(&self) -> f64 {
        self.base_lr * self.gamma.powi((self.steps / self.step_size) as i32)
    }
    pub fn step<O: Optimizer>(&mut self, optimizer: &mut O) {
        self.steps += 1;
        optimizer.set_learning_rate(self.lr());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decays_once_per_period() {
        let mut scheduler = StepLr::new(1.0, 200, 0.5);
        scheduler.steps = 199;
        assert_eq!(scheduler.lr(), 1.0);
        scheduler.steps = 200;
        assert_eq!(scheduler.lr(), 0.5);
        scheduler.steps = 401;
        assert_eq!(scheduler.lr(), 0.25);
    }
}
