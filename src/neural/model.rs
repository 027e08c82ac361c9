// projeto: streamtrend
// file: src/neural/model.rs
// Stacked GRU network with dense sigmoid head, forward pass and backpropagation through time

use ndarray::{Array1, Array2, ArrayViewD, ArrayViewMutD};
use rand::Rng;
use rand_distr::{Bernoulli, Distribution};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::neural::utils::{binary_cross_entropy, count_threshold_matches, outer, relu, sigmoid, tanh, TrainingError};

/// Layer sizes of the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    pub window_size: usize,
    pub input_dim: usize,
    pub gru_units: Vec<usize>,
    pub dense_units: usize,
    pub output_dim: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GruLayerWeights {
    pub w_z: Array2<f64>,  // Update gate input weights
    pub u_z: Array2<f64>,  // Update gate recurrent weights
    pub b_z: Array1<f64>,
    pub w_r: Array2<f64>,  // Reset gate input weights
    pub u_r: Array2<f64>,  // Reset gate recurrent weights
    pub b_r: Array1<f64>,
    pub w_n: Array2<f64>,  // Candidate input weights
    pub u_n: Array2<f64>,  // Candidate recurrent weights
    pub b_n: Array1<f64>,
}

impl GruLayerWeights {
    fn glorot<R: Rng>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        GruLayerWeights {
            w_z: glorot_uniform(hidden_size, input_size, rng),
            u_z: glorot_uniform(hidden_size, hidden_size, rng),
            b_z: Array1::zeros(hidden_size),
            w_r: glorot_uniform(hidden_size, input_size, rng),
            u_r: glorot_uniform(hidden_size, hidden_size, rng),
            b_r: Array1::zeros(hidden_size),
            w_n: glorot_uniform(hidden_size, input_size, rng),
            u_n: glorot_uniform(hidden_size, hidden_size, rng),
            b_n: Array1::zeros(hidden_size),
        }
    }

    fn zeros_like(&self) -> Self {
        GruLayerWeights {
            w_z: Array2::zeros(self.w_z.raw_dim()),
            u_z: Array2::zeros(self.u_z.raw_dim()),
            b_z: Array1::zeros(self.b_z.raw_dim()),
            w_r: Array2::zeros(self.w_r.raw_dim()),
            u_r: Array2::zeros(self.u_r.raw_dim()),
            b_r: Array1::zeros(self.b_r.raw_dim()),
            w_n: Array2::zeros(self.w_n.raw_dim()),
            u_n: Array2::zeros(self.u_n.raw_dim()),
            b_n: Array1::zeros(self.b_n.raw_dim()),
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.b_z.len()
    }

    pub fn input_size(&self) -> usize {
        self.w_z.ncols()
    }

    fn tensors(&self) -> [(&'static str, ArrayViewD<'_, f64>); 9] {
        [
            ("w_z", self.w_z.view().into_dyn()),
            ("u_z", self.u_z.view().into_dyn()),
            ("b_z", self.b_z.view().into_dyn()),
            ("w_r", self.w_r.view().into_dyn()),
            ("u_r", self.u_r.view().into_dyn()),
            ("b_r", self.b_r.view().into_dyn()),
            ("w_n", self.w_n.view().into_dyn()),
            ("u_n", self.u_n.view().into_dyn()),
            ("b_n", self.b_n.view().into_dyn()),
        ]
    }

    fn tensors_mut(&mut self) -> [(&'static str, ArrayViewMutD<'_, f64>); 9] {
        [
            ("w_z", self.w_z.view_mut().into_dyn()),
            ("u_z", self.u_z.view_mut().into_dyn()),
            ("b_z", self.b_z.view_mut().into_dyn()),
            ("w_r", self.w_r.view_mut().into_dyn()),
            ("u_r", self.u_r.view_mut().into_dyn()),
            ("b_r", self.b_r.view_mut().into_dyn()),
            ("w_n", self.w_n.view_mut().into_dyn()),
            ("u_n", self.u_n.view_mut().into_dyn()),
            ("b_n", self.b_n.view_mut().into_dyn()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseWeights {
    pub w: Array2<f64>,
    pub b: Array1<f64>,
}

impl DenseWeights {
    fn glorot<R: Rng>(input_size: usize, output_size: usize, rng: &mut R) -> Self {
        DenseWeights {
            w: glorot_uniform(output_size, input_size, rng),
            b: Array1::zeros(output_size),
        }
    }

    fn zeros_like(&self) -> Self {
        DenseWeights {
            w: Array2::zeros(self.w.raw_dim()),
            b: Array1::zeros(self.b.raw_dim()),
        }
    }

    fn tensors(&self) -> [(&'static str, ArrayViewD<'_, f64>); 2] {
        [("w", self.w.view().into_dyn()), ("b", self.b.view().into_dyn())]
    }

    fn tensors_mut(&mut self) -> [(&'static str, ArrayViewMutD<'_, f64>); 2] {
        [("w", self.w.view_mut().into_dyn()), ("b", self.b.view_mut().into_dyn())]
    }
}

fn glorot_uniform<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Array2<f64> {
    let limit = (6.0 / (rows + cols) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.random_range(-limit..limit))
}

/// All learned parameters. Gradients use the same layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelWeights {
    pub gru_layers: Vec<GruLayerWeights>,
    pub hidden: DenseWeights,
    pub output: DenseWeights,
}

impl ModelWeights {
    pub fn init<R: Rng>(arch: &Architecture, rng: &mut R) -> Result<Self, TrainingError> {
        if arch.gru_units.is_empty() || arch.gru_units.contains(&0) {
            return Err(TrainingError::ModelConfiguration(
                format!("GRU layer sizes must be non-empty and positive: {:?}", arch.gru_units)
            ));
        }
        if arch.input_dim == 0 || arch.output_dim == 0 || arch.dense_units == 0 || arch.window_size == 0 {
            return Err(TrainingError::ModelConfiguration(format!("degenerate architecture: {:?}", arch)));
        }

        let mut gru_layers = Vec::with_capacity(arch.gru_units.len());
        let mut input_size = arch.input_dim;
        for &units in &arch.gru_units {
            gru_layers.push(GruLayerWeights::glorot(input_size, units, rng));
            input_size = units;
        }
        let hidden = DenseWeights::glorot(input_size, arch.dense_units, rng);
        let output = DenseWeights::glorot(arch.dense_units, arch.output_dim, rng);
        Ok(ModelWeights { gru_layers, hidden, output })
    }

    pub fn zeros_like(&self) -> Self {
        ModelWeights {
            gru_layers: self.gru_layers.iter().map(GruLayerWeights::zeros_like).collect(),
            hidden: self.hidden.zeros_like(),
            output: self.output.zeros_like(),
        }
    }

    pub fn named_tensors(&self) -> Vec<(String, ArrayViewD<'_, f64>)> {
        let mut out = Vec::new();
        for (i, layer) in self.gru_layers.iter().enumerate() {
            for (name, t) in layer.tensors() {
                out.push((format!("gru{}.{}", i, name), t));
            }
        }
        for (name, t) in self.hidden.tensors() {
            out.push((format!("dense.{}", name), t));
        }
        for (name, t) in self.output.tensors() {
            out.push((format!("output.{}", name), t));
        }
        out
    }

    pub fn named_tensors_mut(&mut self) -> Vec<(String, ArrayViewMutD<'_, f64>)> {
        let mut out = Vec::new();
        for (i, layer) in self.gru_layers.iter_mut().enumerate() {
            for (name, t) in layer.tensors_mut() {
                out.push((format!("gru{}.{}", i, name), t));
            }
        }
        for (name, t) in self.hidden.tensors_mut() {
            out.push((format!("dense.{}", name), t));
        }
        for (name, t) in self.output.tensors_mut() {
            out.push((format!("output.{}", name), t));
        }
        out
    }

    pub fn num_parameters(&self) -> usize {
        self.named_tensors().iter().map(|(_, t)| t.len()).sum()
    }

    /// Elementwise `self += scale * other`.
    pub fn add_scaled(&mut self, other: &ModelWeights, scale: f64) {
        for ((_, mut mine), (_, theirs)) in self.named_tensors_mut().into_iter().zip(other.named_tensors()) {
            mine.scaled_add(scale, &theirs);
        }
    }

    pub fn scale(&mut self, factor: f64) {
        for (_, mut t) in self.named_tensors_mut() {
            t.mapv_inplace(|v| v * factor);
        }
    }

    pub fn global_norm(&self) -> f64 {
        self.named_tensors().iter()
            .map(|(_, t)| t.iter().map(|v| v * v).sum::<f64>())
            .sum::<f64>()
            .sqrt()
    }

    /// Adds `2 * l2 * W` for every weight matrix of `params`; biases are not decayed.
    pub fn add_l2_gradient(&mut self, params: &ModelWeights, l2: f64) {
        if l2 == 0.0 {
            return;
        }
        for ((_, mut g), (_, p)) in self.named_tensors_mut().into_iter().zip(params.named_tensors()) {
            if p.ndim() == 2 {
                g.scaled_add(2.0 * l2, &p);
            }
        }
    }

    /// SHA-256 over every parameter, in layout order.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, t) in self.named_tensors() {
            hasher.update(name.as_bytes());
            for v in t.iter() {
                hasher.update(v.to_le_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Inverted-dropout masks for one forward pass. Kept entries hold `1/keep`.
#[derive(Debug, Clone)]
pub struct DropoutMasks {
    pub input: Vec<Array1<f64>>,
    pub recurrent: Vec<Array1<f64>>,
    pub dense: Array1<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropoutRates {
    pub input: f64,
    pub recurrent: f64,
    pub dense: f64,
}

impl DropoutMasks {
    pub fn sample<R: Rng>(arch: &Architecture, rates: DropoutRates, rng: &mut R) -> Result<Self, TrainingError> {
        let mut input = Vec::with_capacity(arch.gru_units.len());
        let mut recurrent = Vec::with_capacity(arch.gru_units.len());
        let mut in_size = arch.input_dim;
        for &units in &arch.gru_units {
            input.push(bernoulli_mask(in_size, rates.input, rng)?);
            recurrent.push(bernoulli_mask(units, rates.recurrent, rng)?);
            in_size = units;
        }
        let dense = bernoulli_mask(arch.dense_units, rates.dense, rng)?;
        Ok(DropoutMasks { input, recurrent, dense })
    }
}

fn bernoulli_mask<R: Rng>(len: usize, rate: f64, rng: &mut R) -> Result<Array1<f64>, TrainingError> {
    if rate <= 0.0 {
        return Ok(Array1::ones(len));
    }
    if rate >= 1.0 {
        return Err(TrainingError::ModelConfiguration(format!("dropout rate {} leaves no units", rate)));
    }
    let keep = 1.0 - rate;
    let dist = Bernoulli::new(keep)
        .map_err(|e| TrainingError::ModelConfiguration(format!("invalid dropout rate {}: {}", rate, e)))?;
    Ok(Array1::from_shape_fn(len, |_| if dist.sample(rng) { 1.0 / keep } else { 0.0 }))
}

struct StepCache {
    x: Array1<f64>,
    h_prev: Array1<f64>,
    hd: Array1<f64>,
    z: Array1<f64>,
    r: Array1<f64>,
    n: Array1<f64>,
}

struct LayerCache {
    steps: Vec<StepCache>,
}

struct ForwardCache {
    layers: Vec<LayerCache>,
    last_hidden: Array1<f64>,
    dense_pre: Array1<f64>,
    dense_out: Array1<f64>,
    probs: Array1<f64>,
}

/// Loss, correct-unit count and parameter gradients for one sample.
pub struct SampleGradients {
    pub loss: f64,
    pub correct: usize,
    pub grads: ModelWeights,
}

pub struct GruNetwork {
    pub arch: Architecture,
    pub weights: ModelWeights,
}

impl GruNetwork {
    pub fn new<R: Rng>(arch: Architecture, rng: &mut R) -> Result<Self, TrainingError> {
        let weights = ModelWeights::init(&arch, rng)?;
        Ok(GruNetwork { arch, weights })
    }

    pub fn from_weights(arch: Architecture, weights: ModelWeights) -> Result<Self, TrainingError> {
        let mut expected_in = arch.input_dim;
        let layers_match = weights.gru_layers.len() == arch.gru_units.len()
            && weights.gru_layers.iter().zip(&arch.gru_units).all(|(layer, &units)| {
                let ok = layer.hidden_size() == units && layer.input_size() == expected_in;
                expected_in = units;
                ok
            });
        let head_matches = weights.hidden.w.dim() == (arch.dense_units, expected_in)
            && weights.output.w.dim() == (arch.output_dim, arch.dense_units);
        if arch.window_size == 0 || !(layers_match && head_matches) {
            return Err(TrainingError::ModelConfiguration(
                "saved weights do not match the architecture".to_string()
            ));
        }
        Ok(GruNetwork { arch, weights })
    }

    pub fn check_input(&self, sample: &Array2<f64>) -> Result<(), TrainingError> {
        if sample.dim() != (self.arch.window_size, self.arch.input_dim) {
            return Err(TrainingError::Shape(format!(
                "expected ({}, {}) input, got {:?}", self.arch.window_size, self.arch.input_dim, sample.dim()
            )));
        }
        Ok(())
    }

    fn forward_cached(&self, sample: &Array2<f64>, masks: Option<&DropoutMasks>) -> ForwardCache {
        let mut sequence: Vec<Array1<f64>> = sample.rows().into_iter().map(|r| r.to_owned()).collect();
        let mut layers = Vec::with_capacity(self.weights.gru_layers.len());

        for (l, layer) in self.weights.gru_layers.iter().enumerate() {
            let in_mask = masks.map(|m| &m.input[l]);
            let rec_mask = masks.map(|m| &m.recurrent[l]);
            let mut h = Array1::zeros(layer.hidden_size());
            let mut steps = Vec::with_capacity(sequence.len());
            let mut outputs = Vec::with_capacity(sequence.len());

            for x_raw in &sequence {
                let x = match in_mask {
                    Some(m) => x_raw * m,
                    None => x_raw.clone(),
                };
                let step = gru_step(layer, x, h, rec_mask);
                h = &step.z * &step.h_prev + &(1.0 - &step.z) * &step.n;
                outputs.push(h.clone());
                steps.push(step);
            }
            layers.push(LayerCache { steps });
            sequence = outputs;
        }

        let last_hidden = sequence.pop().unwrap_or_else(|| Array1::zeros(self.weights.hidden.w.ncols()));
        let dense_pre = self.weights.hidden.w.dot(&last_hidden) + &self.weights.hidden.b;
        let mut dense_out = relu(&dense_pre);
        if let Some(m) = masks {
            dense_out *= &m.dense;
        }
        let logits = self.weights.output.w.dot(&dense_out) + &self.weights.output.b;
        let probs = sigmoid(&logits);

        ForwardCache { layers, last_hidden, dense_pre, dense_out, probs }
    }

    /// Output probabilities. `masks` turns on dropout.
    pub fn forward(&self, sample: &Array2<f64>, masks: Option<&DropoutMasks>) -> Array1<f64> {
        self.forward_cached(sample, masks).probs
    }

    /// Backpropagation through time for a single (sample, label) pair.
    pub fn sample_gradients(
        &self,
        sample: &Array2<f64>,
        label: &Array1<f64>,
        masks: Option<&DropoutMasks>,
    ) -> SampleGradients {
        let cache = self.forward_cached(sample, masks);
        let loss = binary_cross_entropy(&cache.probs, label);
        let correct = count_threshold_matches(&cache.probs, label);

        let mut grads = self.weights.zeros_like();
        let k = label.len().max(1) as f64;

        // sigmoid + mean BCE
        let d_logits = (&cache.probs - label) / k;
        grads.output.w += &outer(&d_logits, &cache.dense_out);
        grads.output.b += &d_logits;

        let mut d_dense = self.weights.output.w.t().dot(&d_logits);
        if let Some(m) = masks {
            d_dense *= &m.dense;
        }
        let d_pre = Array1::from_shape_fn(d_dense.len(), |i| {
            if cache.dense_pre[i] > 0.0 { d_dense[i] } else { 0.0 }
        });
        grads.hidden.w += &outer(&d_pre, &cache.last_hidden);
        grads.hidden.b += &d_pre;

        let seq_len = sample.nrows();
        let mut d_outputs: Vec<Array1<f64>> = (0..seq_len)
            .map(|_| Array1::zeros(cache.last_hidden.len()))
            .collect();
        if let Some(last) = d_outputs.last_mut() {
            *last = self.weights.hidden.w.t().dot(&d_pre);
        }

        for l in (0..self.weights.gru_layers.len()).rev() {
            let layer = &self.weights.gru_layers[l];
            let g = &mut grads.gru_layers[l];
            let in_mask = masks.map(|m| &m.input[l]);
            let rec_mask = masks.map(|m| &m.recurrent[l]);
            let steps = &cache.layers[l].steps;

            let mut d_inputs: Vec<Array1<f64>> = Vec::with_capacity(seq_len);
            let mut dh_next = Array1::zeros(layer.hidden_size());

            for t in (0..steps.len()).rev() {
                let step = &steps[t];
                let dh = &d_outputs[t] + &dh_next;

                let dz = &dh * &(&step.h_prev - &step.n);
                let dn = &dh * &(1.0 - &step.z);
                let mut dh_prev = &dh * &step.z;

                let da_n = &dn * &step.n.mapv(|v| 1.0 - v * v);
                let rh = &step.r * &step.hd;
                g.w_n += &outer(&da_n, &step.x);
                g.u_n += &outer(&da_n, &rh);
                g.b_n += &da_n;
                let d_rh = layer.u_n.t().dot(&da_n);
                let dr = &d_rh * &step.hd;
                let mut d_hd = &d_rh * &step.r;

                let da_r = &dr * &(&step.r * &(1.0 - &step.r));
                g.w_r += &outer(&da_r, &step.x);
                g.u_r += &outer(&da_r, &step.hd);
                g.b_r += &da_r;

                let da_z = &dz * &(&step.z * &(1.0 - &step.z));
                g.w_z += &outer(&da_z, &step.x);
                g.u_z += &outer(&da_z, &step.hd);
                g.b_z += &da_z;

                d_hd += &layer.u_r.t().dot(&da_r);
                d_hd += &layer.u_z.t().dot(&da_z);
                if let Some(m) = rec_mask {
                    d_hd *= m;
                }
                dh_prev += &d_hd;

                let mut dx = layer.w_n.t().dot(&da_n);
                dx += &layer.w_r.t().dot(&da_r);
                dx += &layer.w_z.t().dot(&da_z);
                if let Some(m) = in_mask {
                    dx *= m;
                }
                d_inputs.push(dx);
                dh_next = dh_prev;
            }

            d_inputs.reverse();
            d_outputs = d_inputs;
        }

        SampleGradients { loss, correct, grads }
    }

    /// Zeroes the first-layer input columns of one feature slot; used to
    /// build models that provably ignore a feature.
    #[cfg(test)]
    pub fn zero_input_column(&mut self, column: usize) {
        if let Some(layer) = self.weights.gru_layers.first_mut() {
            for w in [&mut layer.w_z, &mut layer.w_r, &mut layer.w_n] {
                w.slice_mut(ndarray::s![.., column]).fill(0.0);
            }
        }
    }
}

fn gru_step(layer: &GruLayerWeights, x: Array1<f64>, h_prev: Array1<f64>, rec_mask: Option<&Array1<f64>>) -> StepCache {
    let hd = match rec_mask {
        Some(m) => &h_prev * m,
        None => h_prev.clone(),
    };
    let z = sigmoid(&(layer.w_z.dot(&x) + layer.u_z.dot(&hd) + &layer.b_z));
    let r = sigmoid(&(layer.w_r.dot(&x) + layer.u_r.dot(&hd) + &layer.b_r));
    let n = tanh(&(layer.w_n.dot(&x) + layer.u_n.dot(&(&r * &hd)) + &layer.b_n));
    StepCache { x, h_prev, hd, z, r, n }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn arch() -> Architecture {
        Architecture {
            window_size: 4,
            input_dim: 3,
            gru_units: vec![5, 4],
            dense_units: 4,
            output_dim: 3,
        }
    }

    fn sample() -> Array2<f64> {
        Array2::from_shape_fn((4, 3), |(t, f)| ((t * 3 + f) as f64 * 0.37).sin())
    }

    #[test]
    fn test_network_creation_and_output_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let net = GruNetwork::new(arch(), &mut rng).unwrap();
        assert_eq!(net.weights.gru_layers.len(), 2);
        assert_eq!(net.weights.gru_layers[1].input_size(), 5);
        let probs = net.forward(&sample(), None);
        assert_eq!(probs.len(), 3);
        assert!(probs.iter().all(|&p| p > 0.0 && p < 1.0));
        assert!(net.weights.num_parameters() > 0);
    }

    #[test]
    fn test_invalid_architecture_rejected() {
        let mut bad = arch();
        bad.gru_units = vec![];
        let mut rng = StdRng::seed_from_u64(1);
        assert!(GruNetwork::new(bad, &mut rng).is_err());
    }

    fn loss_at(net: &GruNetwork, x: &Array2<f64>, y: &Array1<f64>) -> f64 {
        binary_cross_entropy(&net.forward(x, None), y)
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut net = GruNetwork::new(arch(), &mut rng).unwrap();
        let x = sample();
        let y = Array1::from_vec(vec![1.0, 0.0, 1.0]);
        let analytic = net.sample_gradients(&x, &y, None).grads;

        let eps = 1e-6;
        let names: Vec<String> = analytic.named_tensors().into_iter().map(|(n, _)| n).collect();
        for (idx, name) in names.iter().enumerate() {
            let expected = analytic.named_tensors()[idx].1.iter().next().copied().unwrap();
            {
                let mut tensors = net.weights.named_tensors_mut();
                let first = tensors[idx].1.iter_mut().next().unwrap();
                *first += eps;
            }
            let plus = loss_at(&net, &x, &y);
            {
                let mut tensors = net.weights.named_tensors_mut();
                let first = tensors[idx].1.iter_mut().next().unwrap();
                *first -= 2.0 * eps;
            }
            let minus = loss_at(&net, &x, &y);
            {
                let mut tensors = net.weights.named_tensors_mut();
                let first = tensors[idx].1.iter_mut().next().unwrap();
                *first += eps;
            }
            let numeric = (plus - minus) / (2.0 * eps);
            assert!(
                (numeric - expected).abs() < 1e-5,
                "{}: numeric {} vs analytic {}", name, numeric, expected
            );
        }
    }

    #[test]
    fn test_dropout_masks_change_output() {
        let mut rng = StdRng::seed_from_u64(3);
        let net = GruNetwork::new(arch(), &mut rng).unwrap();
        let rates = DropoutRates { input: 0.5, recurrent: 0.5, dense: 0.5 };
        let masks = DropoutMasks::sample(&net.arch, rates, &mut rng).unwrap();
        assert!(masks.dense.iter().all(|&v| v == 0.0 || v == 2.0));
        let none = DropoutMasks::sample(&net.arch, DropoutRates { input: 0.0, recurrent: 0.0, dense: 0.0 }, &mut rng).unwrap();
        assert_eq!(net.forward(&sample(), Some(&none)), net.forward(&sample(), None));
    }

    #[test]
    fn test_fingerprint_tracks_parameter_changes() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut net = GruNetwork::new(arch(), &mut rng).unwrap();
        let before = net.weights.fingerprint();
        assert_eq!(before, net.weights.clone().fingerprint());
        net.weights.output.b[0] += 1e-9;
        assert_ne!(before, net.weights.fingerprint());
    }

    #[test]
    fn test_weight_algebra() {
        let mut rng = StdRng::seed_from_u64(9);
        let net = GruNetwork::new(arch(), &mut rng).unwrap();
        let mut acc = net.weights.zeros_like();
        acc.add_scaled(&net.weights, 2.0);
        acc.scale(0.5);
        assert!((acc.global_norm() - net.weights.global_norm()).abs() < 1e-12);
        let mut g = net.weights.zeros_like();
        g.add_l2_gradient(&net.weights, 0.5);
        assert_eq!(g.output.b.sum(), 0.0);
        assert!((g.output.w[[0, 0]] - net.weights.output.w[[0, 0]]).abs() < 1e-12);
    }

    #[test]
    fn test_zeroed_column_makes_feature_irrelevant() {
        let mut rng = StdRng::seed_from_u64(13);
        let mut net = GruNetwork::new(arch(), &mut rng).unwrap();
        net.zero_input_column(1);
        let x = sample();
        let mut x2 = x.clone();
        x2.column_mut(1).fill(42.0);
        assert_eq!(net.forward(&x, None), net.forward(&x2, None));
    }
}
