//! Pre-trained BiLSTM denoiser, inference only.
//!
//! Layout of the safetensors file:
//!
//! - `lstm1.{forward,backward}.{weight_ih,weight_hh,bias_ih,bias_hh}`: first
//!   bidirectional layer over the 1-d input, full sequence out
//! - `lstm2.{forward,backward}.*`: second bidirectional layer, final states out
//! - `dense1.{weight,bias}`: relu head sized to the window
//! - `dense2.{weight,bias}`: linear output, one value per window sample
//!
//! Gate order is input, forget, cell, output. Dropout only exists at train
//! time and has no weights.

use std::path::Path;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder, linear};

use super::SequenceDenoiser;
use crate::error::{Result, SyncError};

const HIDDEN: usize = 1;
const GATES: usize = 4;

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

struct LstmCell {
    w_ih: Vec<Vec<f32>>,
    w_hh: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

impl LstmCell {
    fn load(vb: &VarBuilder<'_>, input: usize) -> candle_core::Result<Self> {
        let w_ih = vb.get((GATES * HIDDEN, input), "weight_ih")?.to_vec2::<f32>()?;
        let w_hh = vb.get((GATES * HIDDEN, HIDDEN), "weight_hh")?.to_vec2::<f32>()?;
        let b_ih = vb.get(GATES * HIDDEN, "bias_ih")?;
        let b_hh = vb.get(GATES * HIDDEN, "bias_hh")?;
        let bias = (b_ih + b_hh)?.to_vec1::<f32>()?;
        Ok(Self { w_ih, w_hh, bias })
    }

    /// Hidden state after every step of `xs`.
    fn run<'x>(&self, xs: impl Iterator<Item = &'x [f32]>) -> Vec<Vec<f32>> {
        let mut h = vec![0.0f32; HIDDEN];
        let mut c = vec![0.0f32; HIDDEN];
        let mut states = Vec::new();
        for x in xs {
            let gates: Vec<f32> = (0..GATES * HIDDEN)
                .map(|g| {
                    let input: f32 = self.w_ih[g].iter().zip(x).map(|(w, v)| w * v).sum();
                    let recurrent: f32 = self.w_hh[g].iter().zip(&h).map(|(w, v)| w * v).sum();
                    input + recurrent + self.bias[g]
                })
                .collect();
            for k in 0..HIDDEN {
                let i = sigmoid(gates[k]);
                let f = sigmoid(gates[HIDDEN + k]);
                let g = gates[2 * HIDDEN + k].tanh();
                let o = sigmoid(gates[3 * HIDDEN + k]);
                c[k] = f * c[k] + i * g;
                h[k] = o * c[k].tanh();
            }
            states.push(h.clone());
        }
        states
    }
}

struct BiLstm {
    forward: LstmCell,
    backward: LstmCell,
}

impl BiLstm {
    fn load(vb: &VarBuilder<'_>, input: usize) -> candle_core::Result<Self> {
        Ok(Self {
            forward: LstmCell::load(&vb.pp("forward"), input)?,
            backward: LstmCell::load(&vb.pp("backward"), input)?,
        })
    }

    /// `[forward_t, backward_t]` for every step.
    fn sequence(&self, xs: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let fwd = self.forward.run(xs.iter().map(Vec::as_slice));
        let mut bwd = self.backward.run(xs.iter().rev().map(Vec::as_slice));
        bwd.reverse();
        fwd.into_iter()
            .zip(bwd)
            .map(|(mut f, b)| {
                f.extend(b);
                f
            })
            .collect()
    }

    /// Final forward state and final backward state (at the first step).
    fn last(&self, xs: &[Vec<f32>]) -> Vec<f32> {
        let fwd = self.forward.run(xs.iter().map(Vec::as_slice));
        let bwd = self.backward.run(xs.iter().rev().map(Vec::as_slice));
        let mut out = fwd.last().cloned().unwrap_or_else(|| vec![0.0; HIDDEN]);
        out.extend(bwd.last().cloned().unwrap_or_else(|| vec![0.0; HIDDEN]));
        out
    }
}

pub struct BiLstmDenoiser {
    lstm1: BiLstm,
    lstm2: BiLstm,
    dense1: Linear,
    dense2: Linear,
    window_len: usize,
    device: Device,
}

impl BiLstmDenoiser {
    pub fn load(path: &Path) -> Result<Self> {
        let device = Device::Cpu;
        let tensors = candle_core::safetensors::load(path, &device)?;
        let window_len = match tensors.get("dense2.bias") {
            Some(bias) => bias.dims1()?,
            None => {
                return Err(SyncError::Model {
                    reason: format!("{} has no dense2.bias tensor", path.display()),
                });
            }
        };
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let denoiser = Self::from_var_builder(&vb, window_len, device)?;
        log::info!(
            "Loaded BiLSTM denoiser from {} ({window_len}-sample windows)",
            path.display()
        );
        Ok(denoiser)
    }

    pub fn from_var_builder(vb: &VarBuilder<'_>, window_len: usize, device: Device) -> Result<Self> {
        Ok(Self {
            lstm1: BiLstm::load(&vb.pp("lstm1"), 1)?,
            lstm2: BiLstm::load(&vb.pp("lstm2"), 2 * HIDDEN)?,
            dense1: linear(2 * HIDDEN, window_len, vb.pp("dense1"))?,
            dense2: linear(window_len, window_len, vb.pp("dense2"))?,
            window_len,
            device,
        })
    }
}

impl SequenceDenoiser for BiLstmDenoiser {
    fn window_len(&self) -> Option<usize> {
        Some(self.window_len)
    }

    fn predict(&self, window: &[f32]) -> Result<Vec<f32>> {
        if window.len() != self.window_len {
            return Err(SyncError::Model {
                reason: format!(
                    "model expects {}-sample windows, got {}",
                    self.window_len,
                    window.len()
                ),
            });
        }
        let steps: Vec<Vec<f32>> = window.iter().map(|&v| vec![v]).collect();
        let hidden = self.lstm1.sequence(&steps);
        let summary = self.lstm2.last(&hidden);

        let xs = Tensor::from_vec(summary, (1, 2 * HIDDEN), &self.device)?;
        let xs = self.dense1.forward(&xs)?.relu()?;
        let ys = self.dense2.forward(&xs)?;
        Ok(ys.flatten_all()?.to_vec1::<f32>()?)
    }
}
