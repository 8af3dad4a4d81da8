//! Recursive Classifier (C9): a small dense network that refines its
//! hypothesis over K steps and stops early once its confidence converges.

use std::collections::HashMap;
use std::time::Instant;

use ndarray::{Array1, Array2};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::sample::FEATURE_DIM;

/// Hidden-state width. Chosen so the parameter count (two `hidden x
/// (input+hidden)` blocks plus a `hidden x hidden` block) lands on the
/// order of 10^6, per the design's "small enough to train on a few hundred
/// samples, large enough to capture parameter-vs-measurement patterns".
pub const HIDDEN_DIM: usize = 512;

/// One refinement step's record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: usize,
    pub prediction_logit: f64,
    pub confidence: f64,
    /// A compact snapshot of the hidden state's activation magnitude,
    /// rather than the full hidden vector — enough to drive the
    /// human-readable narrative without bloating the trace.
    pub activation_norm: f64,
}

/// Full reasoning trace for one `reason(x)` call (a TRMResult).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub steps: Vec<StepRecord>,
    pub final_prediction: f64,
    pub final_confidence: f64,
    pub steps_taken: usize,
    pub wall_clock_micros: u128,
    pub model_version_id: Option<String>,
    pub reasoning: String,
}

/// The recursive classifier's weights. Deterministic at inference: no
/// stochastic layers, so `reason` with identical weights and input always
/// returns an identical trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierWeights {
    pub input_dim: usize,
    pub hidden_dim: usize,
    w1: Array2<f64>,
    b1: Array1<f64>,
    w_gate: Array2<f64>,
    b_gate: Array1<f64>,
    w2: Array2<f64>,
    b2: Array1<f64>,
    w_out: Array1<f64>,
    b_out: f64,
    w_conf: Array1<f64>,
    b_conf: f64,
}

impl ClassifierWeights {
    /// Initialize with small uniform random weights, seeded so the
    /// initialization itself is reproducible across runs (inference
    /// determinism only requires fixed *weights*, but reproducible
    /// training requires a fixed seed too).
    pub fn init(seed: u64) -> Self {
        Self::init_with_dims(FEATURE_DIM, HIDDEN_DIM, seed)
    }

    pub fn init_with_dims(input_dim: usize, hidden_dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let bound = 1.0 / (input_dim as f64 + hidden_dim as f64).sqrt();
        let dist = Uniform::new(-bound, bound);
        let concat_dim = input_dim + hidden_dim;

        let sample_matrix =
            |rng: &mut StdRng, rows: usize, cols: usize| -> Array2<f64> { Array2::from_shape_fn((rows, cols), |_| dist.sample(rng)) };
        let sample_vector = |rng: &mut StdRng, len: usize| -> Array1<f64> { Array1::from_shape_fn(len, |_| dist.sample(rng)) };

        ClassifierWeights {
            input_dim,
            hidden_dim,
            w1: sample_matrix(&mut rng, hidden_dim, concat_dim),
            b1: Array1::zeros(hidden_dim),
            w_gate: sample_matrix(&mut rng, hidden_dim, concat_dim),
            b_gate: Array1::zeros(hidden_dim),
            w2: sample_matrix(&mut rng, hidden_dim, hidden_dim),
            b2: Array1::zeros(hidden_dim),
            w_out: sample_vector(&mut rng, hidden_dim),
            b_out: 0.0,
            w_conf: sample_vector(&mut rng, hidden_dim),
            b_conf: 0.0,
        }
    }

    /// Parameter count, for diagnostics / budget checks.
    pub fn parameter_count(&self) -> usize {
        self.w1.len() + self.b1.len() + self.w_gate.len() + self.b_gate.len() + self.w2.len() + self.b2.len() + self.w_out.len() + 1
            + self.w_conf.len()
            + 1
    }

    fn concat(&self, x: &Array1<f64>, h: &Array1<f64>) -> Array1<f64> {
        ndarray::concatenate(ndarray::Axis(0), &[x.view(), h.view()]).expect("x and h dimensions are fixed at construction")
    }

    /// One refinement step: h_t = f(x, h_{t-1}), a two-block gated dense
    /// network — block one produces a candidate update, a sigmoid gate
    /// (computed from the same concatenated input) decides how much of the
    /// previous hidden state survives.
    fn step(&self, x: &Array1<f64>, h_prev: &Array1<f64>) -> (Array1<f64>, f64, f64) {
        let concat = self.concat(x, h_prev);

        let block1 = (self.w1.dot(&concat) + &self.b1).mapv(f64::tanh);
        let gate = (self.w_gate.dot(&concat) + &self.b_gate).mapv(sigmoid);
        let candidate = (self.w2.dot(&block1) + &self.b2).mapv(f64::tanh);

        let h_t = &gate * &candidate + (1.0 - &gate) * h_prev;

        let prediction_logit = self.w_out.dot(&h_t) + self.b_out;
        let confidence = sigmoid(self.w_conf.dot(&h_t) + self.b_conf);

        (h_t, prediction_logit, confidence)
    }
}

/// One step's cached intermediate activations, retained for the trainer's
/// backward pass. `reason` never needs these — only the training loop,
/// which must backpropagate through every step it ran regardless of where
/// inference would have stopped early.
#[derive(Debug, Clone)]
pub(crate) struct StepCache {
    concat: Array1<f64>,
    block1: Array1<f64>,
    gate: Array1<f64>,
    candidate: Array1<f64>,
    h_prev: Array1<f64>,
    h_t: Array1<f64>,
    logit: f64,
    conf: f64,
}

/// Upstream loss gradient at one supervised step, already reduced through
/// the sigmoid (i.e. `prediction - target`), so `backward` only has to
/// chain it through the dense blocks.
pub(crate) struct StepGrad {
    pub dlogit: f64,
    pub dconf: f64,
}

/// Gradient accumulator mirroring `ClassifierWeights`' shape, produced by
/// `backward` and consumed by `apply_adam`.
#[derive(Debug, Clone)]
pub(crate) struct ClassifierGradients {
    pub w1: Array2<f64>,
    pub b1: Array1<f64>,
    pub w_gate: Array2<f64>,
    pub b_gate: Array1<f64>,
    pub w2: Array2<f64>,
    pub b2: Array1<f64>,
    pub w_out: Array1<f64>,
    pub b_out: f64,
    pub w_conf: Array1<f64>,
    pub b_conf: f64,
}

impl ClassifierGradients {
    pub(crate) fn zeros_like(weights: &ClassifierWeights) -> Self {
        ClassifierGradients {
            w1: Array2::zeros(weights.w1.raw_dim()),
            b1: Array1::zeros(weights.b1.len()),
            w_gate: Array2::zeros(weights.w_gate.raw_dim()),
            b_gate: Array1::zeros(weights.b_gate.len()),
            w2: Array2::zeros(weights.w2.raw_dim()),
            b2: Array1::zeros(weights.b2.len()),
            w_out: Array1::zeros(weights.w_out.len()),
            b_out: 0.0,
            w_conf: Array1::zeros(weights.w_conf.len()),
            b_conf: 0.0,
        }
    }

    pub(crate) fn add_assign(&mut self, other: &ClassifierGradients) {
        self.w1 += &other.w1;
        self.b1 += &other.b1;
        self.w_gate += &other.w_gate;
        self.b_gate += &other.b_gate;
        self.w2 += &other.w2;
        self.b2 += &other.b2;
        self.w_out += &other.w_out;
        self.b_out += other.b_out;
        self.w_conf += &other.w_conf;
        self.b_conf += other.b_conf;
    }

    pub(crate) fn scale(&mut self, factor: f64) {
        self.w1 *= factor;
        self.b1 *= factor;
        self.w_gate *= factor;
        self.b_gate *= factor;
        self.w2 *= factor;
        self.b2 *= factor;
        self.w_out *= factor;
        self.b_out *= factor;
        self.w_conf *= factor;
        self.b_conf *= factor;
    }
}

/// Per-parameter first/second moment estimates for the Adam optimizer.
pub(crate) struct AdamState {
    m: ClassifierGradients,
    v: ClassifierGradients,
    t: u64,
}

impl AdamState {
    pub(crate) fn new(weights: &ClassifierWeights) -> Self {
        AdamState { m: ClassifierGradients::zeros_like(weights), v: ClassifierGradients::zeros_like(weights), t: 0 }
    }
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    let a2 = a.view().insert_axis(ndarray::Axis(1));
    let b2 = b.view().insert_axis(ndarray::Axis(0));
    a2.dot(&b2)
}

fn adam_step_array<D: ndarray::Dimension>(
    param: &mut ndarray::Array<f64, D>,
    m: &mut ndarray::Array<f64, D>,
    v: &mut ndarray::Array<f64, D>,
    grad: &ndarray::Array<f64, D>,
    lr: f64,
    weight_decay: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    bias1: f64,
    bias2: f64,
) {
    *m = &*m * beta1 + &(grad * (1.0 - beta1));
    *v = &*v * beta2 + &(grad.mapv(|x| x * x) * (1.0 - beta2));
    let m_hat = &*m / bias1;
    let v_hat = &*v / bias2;
    let update = &m_hat / &(v_hat.mapv(f64::sqrt) + eps);
    *param = &*param * (1.0 - lr * weight_decay) - &update * lr;
}

#[allow(clippy::too_many_arguments)]
fn adam_step_scalar(
    param: &mut f64,
    m: &mut f64,
    v: &mut f64,
    grad: f64,
    lr: f64,
    weight_decay: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    bias1: f64,
    bias2: f64,
) {
    *m = *m * beta1 + grad * (1.0 - beta1);
    *v = *v * beta2 + grad * grad * (1.0 - beta2);
    let m_hat = *m / bias1;
    let v_hat = *v / bias2;
    let update = m_hat / (v_hat.sqrt() + eps);
    *param = *param * (1.0 - lr * weight_decay) - update * lr;
}

impl ClassifierWeights {
    /// Forward pass retaining every step's intermediate activations. Unlike
    /// `reason`, this always runs the full `steps` count: deep supervision
    /// needs activations at fixed step indices regardless of where
    /// confidence would have converged.
    pub(crate) fn forward_cached(&self, x: &[f64], steps: usize) -> Vec<StepCache> {
        let x = Array1::from_vec(x.to_vec());
        let mut h = Array1::zeros(self.hidden_dim);
        let mut caches = Vec::with_capacity(steps);

        for _ in 0..steps.max(1) {
            let concat = self.concat(&x, &h);
            let block1 = (self.w1.dot(&concat) + &self.b1).mapv(f64::tanh);
            let gate = (self.w_gate.dot(&concat) + &self.b_gate).mapv(sigmoid);
            let candidate = (self.w2.dot(&block1) + &self.b2).mapv(f64::tanh);
            let h_t = &gate * &candidate + (1.0 - &gate) * &h;
            let logit = self.w_out.dot(&h_t) + self.b_out;
            let conf = sigmoid(self.w_conf.dot(&h_t) + self.b_conf);

            caches.push(StepCache { concat, block1, gate, candidate, h_prev: h.clone(), h_t: h_t.clone(), logit, conf });
            h = h_t;
        }
        caches
    }

    /// Backpropagation through time over a cached forward pass.
    /// `step_grads` carries the already-sigmoid-reduced upstream gradient
    /// (`prediction - target`) at each 1-indexed step that deep supervision
    /// applies a loss to; steps without an entry only receive gradient
    /// flowing back from later steps' hidden-state dependency.
    pub(crate) fn backward(&self, caches: &[StepCache], step_grads: &HashMap<usize, StepGrad>) -> ClassifierGradients {
        let mut grads = ClassifierGradients::zeros_like(self);
        let mut dh_next = Array1::<f64>::zeros(self.hidden_dim);

        for (idx, cache) in caches.iter().enumerate().rev() {
            let step = idx + 1;
            let mut dh_t = dh_next.clone();

            if let Some(step_grad) = step_grads.get(&step) {
                dh_t = dh_t + &self.w_out * step_grad.dlogit + &self.w_conf * step_grad.dconf;
                grads.w_out += &(&cache.h_t * step_grad.dlogit);
                grads.b_out += step_grad.dlogit;
                grads.w_conf += &(&cache.h_t * step_grad.dconf);
                grads.b_conf += step_grad.dconf;
            }

            let dgate = &dh_t * &(&cache.candidate - &cache.h_prev);
            let dcandidate = &dh_t * &cache.gate;
            let dh_prev_direct = &dh_t * &(1.0 - &cache.gate);

            let du2 = &dcandidate * &cache.candidate.mapv(|c| 1.0 - c * c);
            grads.w2 += &outer(&du2, &cache.block1);
            grads.b2 += &du2;
            let dblock1 = self.w2.t().dot(&du2);

            let du1 = &dblock1 * &cache.block1.mapv(|b| 1.0 - b * b);
            grads.w1 += &outer(&du1, &cache.concat);
            grads.b1 += &du1;
            let dconcat_from_block1 = self.w1.t().dot(&du1);

            let dug = &dgate * &cache.gate.mapv(|g| g * (1.0 - g));
            grads.w_gate += &outer(&dug, &cache.concat);
            grads.b_gate += &dug;
            let dconcat_from_gate = self.w_gate.t().dot(&dug);

            let dconcat = dconcat_from_block1 + dconcat_from_gate;
            let dh_prev_from_concat = dconcat.slice(ndarray::s![self.input_dim..]).to_owned();

            dh_next = dh_prev_direct + dh_prev_from_concat;
        }

        grads
    }

    /// One AdamW step: adaptive moment estimation with decoupled weight
    /// decay, matching the design's "adaptive, with weight decay" optimizer
    /// requirement.
    pub(crate) fn apply_adam(&mut self, grads: &ClassifierGradients, state: &mut AdamState, lr: f64, weight_decay: f64) {
        state.t += 1;
        let (beta1, beta2, eps) = (0.9, 0.999, 1e-8);
        let bias1 = 1.0 - beta1.powi(state.t as i32);
        let bias2 = 1.0 - beta2.powi(state.t as i32);

        adam_step_array(&mut self.w1, &mut state.m.w1, &mut state.v.w1, &grads.w1, lr, weight_decay, beta1, beta2, eps, bias1, bias2);
        adam_step_array(&mut self.b1, &mut state.m.b1, &mut state.v.b1, &grads.b1, lr, weight_decay, beta1, beta2, eps, bias1, bias2);
        adam_step_array(
            &mut self.w_gate,
            &mut state.m.w_gate,
            &mut state.v.w_gate,
            &grads.w_gate,
            lr,
            weight_decay,
            beta1,
            beta2,
            eps,
            bias1,
            bias2,
        );
        adam_step_array(
            &mut self.b_gate,
            &mut state.m.b_gate,
            &mut state.v.b_gate,
            &grads.b_gate,
            lr,
            weight_decay,
            beta1,
            beta2,
            eps,
            bias1,
            bias2,
        );
        adam_step_array(&mut self.w2, &mut state.m.w2, &mut state.v.w2, &grads.w2, lr, weight_decay, beta1, beta2, eps, bias1, bias2);
        adam_step_array(&mut self.b2, &mut state.m.b2, &mut state.v.b2, &grads.b2, lr, weight_decay, beta1, beta2, eps, bias1, bias2);
        adam_step_array(
            &mut self.w_out,
            &mut state.m.w_out,
            &mut state.v.w_out,
            &grads.w_out,
            lr,
            weight_decay,
            beta1,
            beta2,
            eps,
            bias1,
            bias2,
        );
        adam_step_scalar(&mut self.b_out, &mut state.m.b_out, &mut state.v.b_out, grads.b_out, lr, weight_decay, beta1, beta2, eps, bias1, bias2);
        adam_step_array(
            &mut self.w_conf,
            &mut state.m.w_conf,
            &mut state.v.w_conf,
            &grads.w_conf,
            lr,
            weight_decay,
            beta1,
            beta2,
            eps,
            bias1,
            bias2,
        );
        adam_step_scalar(
            &mut self.b_conf,
            &mut state.m.b_conf,
            &mut state.v.b_conf,
            grads.b_conf,
            lr,
            weight_decay,
            beta1,
            beta2,
            eps,
            bias1,
            bias2,
        );
    }

    /// Exponential moving average update: `self = decay*self +
    /// (1-decay)*live`, used to publish stable weights for validation and
    /// checkpointing while the live weights keep taking gradient steps.
    pub(crate) fn ema_update(&mut self, live: &ClassifierWeights, decay: f64) {
        self.w1 = &self.w1 * decay + &live.w1 * (1.0 - decay);
        self.b1 = &self.b1 * decay + &live.b1 * (1.0 - decay);
        self.w_gate = &self.w_gate * decay + &live.w_gate * (1.0 - decay);
        self.b_gate = &self.b_gate * decay + &live.b_gate * (1.0 - decay);
        self.w2 = &self.w2 * decay + &live.w2 * (1.0 - decay);
        self.b2 = &self.b2 * decay + &live.b2 * (1.0 - decay);
        self.w_out = &self.w_out * decay + &live.w_out * (1.0 - decay);
        self.b_out = self.b_out * decay + live.b_out * (1.0 - decay);
        self.w_conf = &self.w_conf * decay + &live.w_conf * (1.0 - decay);
        self.b_conf = self.b_conf * decay + live.b_conf * (1.0 - decay);
    }
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// `reason(x) -> Trace`. Runs the refinement loop for up to `max_steps`,
/// stopping early once confidence has converged for two consecutive
/// deltas (t >= 3 and both |Δconfidence| < epsilon).
pub fn reason(weights: &ClassifierWeights, x: &[f64], max_steps: usize, epsilon: f64, model_version_id: Option<&str>) -> Trace {
    let start = Instant::now();
    let x = Array1::from_vec(x.to_vec());
    let mut h = Array1::zeros(weights.hidden_dim);

    let mut steps = Vec::with_capacity(max_steps);
    let mut confidences = Vec::with_capacity(max_steps);
    let mut last_logit = 0.0;

    for t in 1..=max_steps.max(1) {
        let (h_t, prediction_logit, confidence) = weights.step(&x, &h);
        h = h_t;
        last_logit = prediction_logit;
        confidences.push(confidence);

        steps.push(StepRecord {
            step: t,
            prediction_logit,
            confidence,
            activation_norm: h.dot(&h).sqrt(),
        });

        if t >= 3 {
            let d1 = (confidences[t - 1] - confidences[t - 2]).abs();
            let d2 = (confidences[t - 1] - confidences[t - 3]).abs();
            if d1 < epsilon && d2 < epsilon {
                break;
            }
        }
    }

    let steps_taken = steps.len();
    let final_confidence = steps.last().map(|s| s.confidence).unwrap_or(0.5);
    let final_prediction = sigmoid(last_logit);

    let reasoning = narrate(&steps);

    Trace {
        steps,
        final_prediction,
        final_confidence,
        steps_taken,
        wall_clock_micros: start.elapsed().as_micros(),
        model_version_id: model_version_id.map(str::to_string),
        reasoning,
    }
}

/// Build a human-readable summary from the step trace's activation
/// magnitudes and confidence trajectory.
fn narrate(steps: &[StepRecord]) -> String {
    let Some(last) = steps.last() else {
        return "no refinement steps taken".to_string();
    };
    let trend = if steps.len() > 1 && last.confidence > steps[0].confidence { "increasing" } else { "stable" };
    format!(
        "converged after {} step(s); confidence {} ({:.3} -> {:.3}); final activation norm {:.3}",
        steps.len(),
        trend,
        steps[0].confidence,
        last.confidence,
        last.activation_norm
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_weights_and_input_are_deterministic() {
        let weights = ClassifierWeights::init_with_dims(8, 16, 42);
        let x = vec![0.1; 8];
        let trace_a = reason(&weights, &x, 16, 0.01, None);
        let trace_b = reason(&weights, &x, 16, 0.01, None);
        assert_eq!(trace_a.final_prediction, trace_b.final_prediction);
        assert_eq!(trace_a.steps_taken, trace_b.steps_taken);
    }

    #[test]
    fn stops_no_later_than_max_steps() {
        let weights = ClassifierWeights::init_with_dims(8, 16, 7);
        let x = vec![0.2; 8];
        let trace = reason(&weights, &x, 16, 0.01, None);
        assert!(trace.steps_taken <= 16);
        assert!(trace.steps_taken >= 1);
    }

    #[test]
    fn early_stop_requires_at_least_three_steps() {
        let weights = ClassifierWeights::init_with_dims(8, 16, 7);
        let x = vec![0.0; 8];
        let trace = reason(&weights, &x, 16, 1.0, None);
        assert!(trace.steps_taken >= 3 || trace.steps_taken == 16);
    }

    #[test]
    fn parameter_count_is_on_the_order_of_a_million() {
        let weights = ClassifierWeights::init(1);
        assert!(weights.parameter_count() > 100_000);
        assert!(weights.parameter_count() < 5_000_000);
    }

    #[test]
    fn gradient_descent_reduces_training_loss() {
        let mut weights = ClassifierWeights::init_with_dims(4, 8, 3);
        let mut adam = AdamState::new(&weights);
        let x = vec![1.0, 0.5, -0.5, 0.2];
        let label = 1u8;
        let steps = [1usize, 2, 3];

        let initial_loss = sigmoid(weights.forward_cached(&x, 4).last().unwrap().logit);
        for _ in 0..50 {
            let caches = weights.forward_cached(&x, 4);
            let mut step_grads = HashMap::new();
            for &step in &steps {
                let cache = &caches[step - 1];
                let pred = sigmoid(cache.logit);
                step_grads.insert(step, StepGrad { dlogit: pred - label as f64, dconf: 0.0 });
            }
            let grads = weights.backward(&caches, &step_grads);
            weights.apply_adam(&grads, &mut adam, 0.05, 1e-4);
        }
        let final_loss = sigmoid(weights.forward_cached(&x, 4).last().unwrap().logit);

        assert!(final_loss > initial_loss, "prediction should move toward the positive label after training");
    }
}
