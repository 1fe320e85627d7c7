//! Gradient accumulation window with global-norm clipping.
//!
//! burn's `GradientsAccumulator` sums gradients but hides them until the
//! window is taken. Here the running sum must be clipped after every
//! micro-step, so the window keeps its own `GradientsParams` and walks the
//! module's parameters with visitors.

use std::marker::PhantomData;

use burn::module::{AutodiffModule, ModuleVisitor, ParamId};
use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

/// Summed gradients of the current accumulation window.
pub struct GradientWindow<M> {
    grads: GradientsParams,
    micro_steps: usize,
    _module: PhantomData<M>,
}

impl<M> Default for GradientWindow<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> GradientWindow<M> {
    pub fn new() -> Self {
        Self {
            grads: GradientsParams::new(),
            micro_steps: 0,
            _module: PhantomData,
        }
    }

    /// Micro-steps accumulated since the last [`take`](Self::take).
    pub fn micro_steps(&self) -> usize {
        self.micro_steps
    }

    pub fn is_empty(&self) -> bool {
        self.grads.len() == 0
    }

    /// Hand the accumulated gradients to the optimizer and start a new window.
    pub fn take(&mut self) -> GradientsParams {
        self.micro_steps = 0;
        std::mem::replace(&mut self.grads, GradientsParams::new())
    }
}

impl<M> GradientWindow<M> {
    /// Add one micro-step's gradients to the window.
    pub fn accumulate<B>(&mut self, module: &M, grads: GradientsParams)
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        let mut visitor = AccumulateVisitor::<B> {
            window: &mut self.grads,
            incoming: grads,
            _backend: PhantomData,
        };
        module.visit(&mut visitor);
        self.micro_steps += 1;
    }

    /// Global L2 norm of the accumulated gradients.
    pub fn norm<B>(&self, module: &M) -> f64
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        let mut visitor = SquaredNormVisitor::<B> {
            grads: &self.grads,
            sum: 0.0,
            _backend: PhantomData,
        };
        module.visit(&mut visitor);
        visitor.sum.sqrt()
    }

    /// Rescale the accumulated gradients so their global norm is at most
    /// `max_norm`. Returns the norm before clipping.
    pub fn clip_norm<B>(&mut self, module: &M, max_norm: f64) -> f64
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        let total = self.norm::<B>(module);
        let coef = max_norm / (total + 1e-6);
        if coef < 1.0 {
            let mut visitor = ScaleVisitor::<B> {
                grads: &mut self.grads,
                factor: coef,
                _backend: PhantomData,
            };
            module.visit(&mut visitor);
        }
        total
    }
}

struct AccumulateVisitor<'a, B: AutodiffBackend> {
    window: &'a mut GradientsParams,
    incoming: GradientsParams,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for AccumulateVisitor<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        let Some(grad) = self.incoming.remove::<B::InnerBackend, D>(id) else {
            return;
        };
        let summed = match self.window.remove::<B::InnerBackend, D>(id) {
            Some(prev) => prev.add(grad),
            None => grad,
        };
        self.window.register::<B::InnerBackend, D>(id, summed);
    }
}

struct SquaredNormVisitor<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    sum: f64,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredNormVisitor<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            let sq: f64 = grad.powf_scalar(2.0).sum().into_scalar().elem();
            self.sum += sq;
        }
    }
}

struct ScaleVisitor<'a, B: AutodiffBackend> {
    grads: &'a mut GradientsParams,
    factor: f64,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for ScaleVisitor<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads
                .register::<B::InnerBackend, D>(id, grad.mul_scalar(self.factor));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use burn::module::Param;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<TestBackend>;

    #[derive(Module, Debug)]
    struct Weights<B: Backend> {
        w: Param<Tensor<B, 1>>,
    }

    fn weights(n: usize) -> Weights<TestAutodiffBackend> {
        let device = Default::default();
        Weights {
            w: Param::from_tensor(Tensor::ones([n], &device)),
        }
    }

    /// Gradients of `scale * sum(w)`: every element gets `scale`.
    fn grads_of(model: &Weights<TestAutodiffBackend>, scale: f32) -> GradientsParams {
        let loss = model.w.val().sum().mul_scalar(scale);
        GradientsParams::from_grads(loss.backward(), model)
    }

    fn grad_values(window: &mut GradientWindow<Weights<TestAutodiffBackend>>, model: &Weights<TestAutodiffBackend>) -> Vec<f32> {
        let grads = window.take();
        grads
            .get::<TestBackend, 1>(model.w.id)
            .expect("w should have a gradient")
            .into_data()
            .to_vec()
            .unwrap()
    }

    #[test]
    fn test_accumulate_sums_micro_steps() {
        let model = weights(4);
        let mut window = GradientWindow::new();
        window.accumulate::<TestAutodiffBackend>(&model, grads_of(&model, 0.25));
        window.accumulate::<TestAutodiffBackend>(&model, grads_of(&model, 0.5));
        assert_eq!(window.micro_steps(), 2);

        let g = grad_values(&mut window, &model);
        for v in g {
            assert!((v - 0.75).abs() < 1e-6);
        }
        assert!(window.is_empty());
        assert_eq!(window.micro_steps(), 0);
    }

    #[test]
    fn test_norm() {
        let model = weights(4);
        let mut window = GradientWindow::new();
        window.accumulate::<TestAutodiffBackend>(&model, grads_of(&model, 3.0));
        // sqrt(4 * 3^2) = 6
        assert!((window.norm::<TestAutodiffBackend>(&model) - 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_clip_scales_to_max_norm() {
        let model = weights(4);
        let mut window = GradientWindow::new();
        window.accumulate::<TestAutodiffBackend>(&model, grads_of(&model, 3.0));

        let before = window.clip_norm::<TestAutodiffBackend>(&model, 1.0);
        assert!((before - 6.0).abs() < 1e-5);
        assert!((window.norm::<TestAutodiffBackend>(&model) - 1.0).abs() < 1e-4);

        let g = grad_values(&mut window, &model);
        for v in g {
            assert!((v - 0.5).abs() < 1e-4, "{v}");
        }
    }

    #[test]
    fn test_clip_leaves_small_gradients() {
        let model = weights(4);
        let mut window = GradientWindow::new();
        window.accumulate::<TestAutodiffBackend>(&model, grads_of(&model, 0.1));
        window.clip_norm::<TestAutodiffBackend>(&model, 1.0);
        let g = grad_values(&mut window, &model);
        for v in g {
            assert!((v - 0.1).abs() < 1e-6);
        }
    }

    #[test]
    fn test_clip_applies_to_running_sum() {
        let model = weights(1);
        let mut window = GradientWindow::new();
        window.accumulate::<TestAutodiffBackend>(&model, grads_of(&model, 0.8));
        window.clip_norm::<TestAutodiffBackend>(&model, 1.0);
        window.accumulate::<TestAutodiffBackend>(&model, grads_of(&model, 0.8));
        // 0.8 + 0.8 = 1.6, clipped back to 1.0
        window.clip_norm::<TestAutodiffBackend>(&model, 1.0);
        let g = grad_values(&mut window, &model);
        assert!((g[0] - 1.0).abs() < 1e-4, "{g:?}");
    }

    #[test]
    fn test_frozen_params_have_no_gradient() {
        let device = Default::default();
        let model = Weights::<TestAutodiffBackend> {
            w: Param::from_tensor(Tensor::from_data(TensorData::from([1.0_f32, 2.0]), &device))
                .set_require_grad(false),
        };
        let mut window = GradientWindow::new();
        let loss = model.w.val().sum() + Tensor::<TestAutodiffBackend, 1>::ones([1], &device).require_grad().sum();
        window.accumulate::<TestAutodiffBackend>(&model, GradientsParams::from_grads(loss.backward(), &model));
        assert!(window.is_empty());
        assert_eq!(window.norm::<TestAutodiffBackend>(&model), 0.0);
    }
}
