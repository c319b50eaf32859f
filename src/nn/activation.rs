use std::{fmt, str::FromStr};

use candle_core::{Module, Result, Tensor};
use candle_nn::{Activation, Init, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    Relu,
    Prelu,
    Elu,
    Gelu,
    Silu,
    LeakyRelu,
}

impl FromStr for ActivationKind {
    type Err = Error;
    fn from_str(s: &str) -> std::result::Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "relu" => Ok(Self::Relu),
            "prelu" => Ok(Self::Prelu),
            "elu" => Ok(Self::Elu),
            "gelu" => Ok(Self::Gelu),
            "silu" | "swish" => Ok(Self::Silu),
            "leaky_relu" | "leakyrelu" => Ok(Self::LeakyRelu),
            _ => Err(Error::UnknownActivation(s.to_owned())),
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Relu => "relu",
            Self::Prelu => "prelu",
            Self::Elu => "elu",
            Self::Gelu => "gelu",
            Self::Silu => "silu",
            Self::LeakyRelu => "leaky_relu",
        };
        f.write_str(name)
    }
}

/// Activation layer. PReLU owns a single learnable slope, the rest are parameter free.
pub enum Act {
    Fixed(Activation),
    Prelu(Tensor),
}

impl Act {
    pub fn new(kind: ActivationKind, negative_slope: f64, vs: VarBuilder) -> Result<Self> {
        Ok(match kind {
            ActivationKind::Relu => Self::Fixed(Activation::Relu),
            ActivationKind::Elu => Self::Fixed(Activation::Elu(1.0)),
            ActivationKind::Gelu => Self::Fixed(Activation::Gelu),
            ActivationKind::Silu => Self::Fixed(Activation::Silu),
            ActivationKind::LeakyRelu => Self::Fixed(Activation::LeakyRelu(negative_slope)),
            ActivationKind::Prelu => {
                Self::Prelu(vs.get_with_hints(1, "prelu", Init::Const(0.25))?)
            }
        })
    }
}

impl Module for Act {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Self::Fixed(act) => act.forward(xs),
            Self::Prelu(slope) => {
                // relu(x) - a * relu(-x)
                let neg = xs.neg()?.relu()?.broadcast_mul(slope)?;
                xs.relu()? - neg
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn parse_names() {
        assert_eq!("PReLU".parse::<ActivationKind>().unwrap(), ActivationKind::Prelu);
        assert_eq!("relu".parse::<ActivationKind>().unwrap(), ActivationKind::Relu);
        assert!("tanhh".parse::<ActivationKind>().is_err());
    }

    #[test]
    fn prelu_scales_negative_part() -> Result<()> {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let act = Act::new(ActivationKind::Prelu, 0.2, vs)?;
        let xs = Tensor::new(&[-4f32, 0., 2.], &Device::Cpu)?;
        assert_eq!(act.forward(&xs)?.to_vec1::<f32>()?, [-1.0, 0.0, 2.0]);
        Ok(())
    }
}
