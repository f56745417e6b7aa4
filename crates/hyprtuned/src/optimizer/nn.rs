//! Tiny dense network used as the optimizer's performance predictor.
//!
//! Plain SGD on mean squared error. Weights serialize to JSON so the model
//! survives restarts.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Sigmoid,
}

impl Activation {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => sigmoid(x),
        }
    }

    /// Derivative with respect to the pre-activation value
    pub fn derivative(self, x: f64) -> f64 {
        match self {
            Activation::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
        }
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    /// `[output][input]`
    weights: Vec<Vec<f64>>,
    biases: Vec<f64>,
    activation: Activation,
    #[serde(skip)]
    last_input: Vec<f64>,
    #[serde(skip)]
    last_preactivation: Vec<f64>,
}

impl DenseLayer {
    /// Xavier-initialised layer
    pub fn new<R: Rng>(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let scale = (2.0 / (input_size + output_size) as f64).sqrt();
        let weights = (0..output_size)
            .map(|_| {
                (0..input_size)
                    .map(|_| rng.gen_range(-1.0..1.0) * scale)
                    .collect()
            })
            .collect();

        Self {
            weights,
            biases: vec![0.0; output_size],
            activation,
            last_input: Vec::new(),
            last_preactivation: Vec::new(),
        }
    }

    pub fn input_size(&self) -> usize {
        self.weights.first().map_or(0, |row| row.len())
    }

    pub fn output_size(&self) -> usize {
        self.weights.len()
    }

    fn preactivation(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.biases)
            .map(|(row, b)| b + row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>())
            .collect()
    }

    pub fn infer(&self, input: &[f64]) -> Vec<f64> {
        self.preactivation(input)
            .into_iter()
            .map(|z| self.activation.apply(z))
            .collect()
    }

    /// Forward pass that keeps what `backward` needs
    fn forward(&mut self, input: &[f64]) -> Vec<f64> {
        self.last_input = input.to_vec();
        self.last_preactivation = self.preactivation(input);
        self.last_preactivation
            .iter()
            .map(|&z| self.activation.apply(z))
            .collect()
    }

    /// Update weights and return the gradient for the previous layer.
    fn backward(&mut self, grad_output: &[f64], learning_rate: f64) -> Vec<f64> {
        let mut grad_input = vec![0.0; self.last_input.len()];

        for (i, row) in self.weights.iter_mut().enumerate() {
            let delta = grad_output[i] * self.activation.derivative(self.last_preactivation[i]);
            self.biases[i] -= learning_rate * delta;
            for (j, w) in row.iter_mut().enumerate() {
                grad_input[j] += *w * delta;
                *w -= learning_rate * delta * self.last_input[j];
            }
        }

        grad_input
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TinyNN {
    layers: Vec<DenseLayer>,
    learning_rate: f64,
}

impl TinyNN {
    /// Fully connected network over `sizes` (input, hidden..., output) with
    /// ReLU hidden layers and a sigmoid output layer.
    pub fn new<R: Rng>(sizes: &[usize], learning_rate: f64, rng: &mut R) -> Self {
        let last = sizes.len().saturating_sub(2);
        let layers = sizes
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                let activation = if i == last {
                    Activation::Sigmoid
                } else {
                    Activation::Relu
                };
                DenseLayer::new(pair[0], pair[1], activation, rng)
            })
            .collect();

        Self {
            layers,
            learning_rate,
        }
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, DenseLayer::input_size)
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, DenseLayer::output_size)
    }

    pub fn predict(&self, input: &[f64]) -> Vec<f64> {
        let mut current = input.to_vec();
        for layer in &self.layers {
            current = layer.infer(&current);
        }
        current
    }

    /// One SGD step; returns the sample's loss before the update.
    pub fn train(&mut self, input: &[f64], target: &[f64]) -> f64 {
        let mut output = input.to_vec();
        for layer in &mut self.layers {
            output = layer.forward(&output);
        }

        let n = output.len() as f64;
        let mut grad: Vec<f64> = output
            .iter()
            .zip(target)
            .map(|(o, t)| 2.0 * (o - t) / n)
            .collect();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad, self.learning_rate);
        }

        output
            .iter()
            .zip(target)
            .map(|(o, t)| (o - t) * (o - t))
            .sum::<f64>()
            / n
    }

    /// One pass over `samples`; returns the mean loss.
    pub fn train_epoch(&mut self, samples: &[(Vec<f64>, Vec<f64>)]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let total: f64 = samples
            .iter()
            .map(|(input, target)| self.train(input, target))
            .sum();
        Some(total / samples.len() as f64)
    }
}
