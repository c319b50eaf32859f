use std::{fmt, str::FromStr};

use candle_core::{Module, Result, Tensor};
use candle_nn::{Dropout, VarBuilder};
use serde::{Deserialize, Serialize};

use super::{Act, ActivationKind, GatConv, GcnConv, GinConv, GnnModule};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GnnType {
    Gcn,
    Gin,
    Gat,
}

impl FromStr for GnnType {
    type Err = Error;
    fn from_str(s: &str) -> std::result::Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "gcn" => Ok(Self::Gcn),
            "gin" => Ok(Self::Gin),
            "gat" => Ok(Self::Gat),
            _ => Err(Error::UnknownGnnType(s.to_owned())),
        }
    }
}

impl fmt::Display for GnnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gcn => "gcn",
            Self::Gin => "gin",
            Self::Gat => "gat",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderParams {
    pub gnn_type: GnnType,
    pub num_layers: usize,
    pub activation: ActivationKind,
    pub feat_drop: f32,
    pub attn_drop: f32,
    pub negative_slope: f64,
    pub residual: bool,
    pub num_heads: usize,
}
impl Default for EncoderParams {
    fn default() -> Self {
        Self {
            gnn_type: GnnType::Gcn,
            num_layers: 5,
            activation: ActivationKind::Prelu,
            feat_drop: 0.0,
            attn_drop: 0.0,
            negative_slope: 0.2,
            residual: true,
            num_heads: 4,
        }
    }
}

/// Width-preserving stack of message-passing layers used as the node embedding backbone.
pub struct GnnEncoder {
    layers: Vec<Box<dyn GnnModule>>,
    acts: Vec<Act>,
    dropout: Dropout,
    residual: bool,
}
impl GnnEncoder {
    pub fn new(dim: usize, params: &EncoderParams, vs: VarBuilder) -> Result<Self> {
        if params.gnn_type == GnnType::Gat && dim % params.num_heads != 0 {
            candle_core::bail!(
                "hidden dim {} is not divisible by {} attention heads",
                dim,
                params.num_heads
            );
        }
        let mut layers: Vec<Box<dyn GnnModule>> = Vec::new();
        let mut acts = Vec::new();
        for i in 0..params.num_layers {
            let vs = vs.pp(format!("layer_{}", i));
            let layer: Box<dyn GnnModule> = match params.gnn_type {
                GnnType::Gcn => Box::new(GcnConv::new(dim, dim, vs.pp("conv"))?),
                GnnType::Gin => Box::new(GinConv::new(dim, dim, params.activation, vs.pp("conv"))?),
                GnnType::Gat => Box::new(GatConv::new(
                    dim,
                    dim,
                    params.num_heads,
                    params.negative_slope,
                    params.attn_drop,
                    vs.pp("conv"),
                )?),
            };
            layers.push(layer);
            acts.push(Act::new(params.activation, params.negative_slope, vs.pp("act"))?);
        }
        Ok(Self {
            layers,
            acts,
            dropout: Dropout::new(params.feat_drop),
            residual: params.residual,
        })
    }
}
impl GnnModule for GnnEncoder {
    fn forward_t(&self, xs: &Tensor, edge_index: &Tensor, train: bool) -> Result<Tensor> {
        let mut h = xs.clone();
        for (layer, act) in self.layers.iter().zip(&self.acts) {
            let out = self.dropout.forward(&h, train)?;
            let out = act.forward(&layer.forward_t(&out, edge_index, train)?)?;
            h = if self.residual { (out + h)? } else { out };
        }
        Ok(h)
    }
}
