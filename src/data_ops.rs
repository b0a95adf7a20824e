use crate::hierarchy::PatchHierarchy;
use crate::index_space::IndexSpace;
use crate::message::comm::{Communicator, Reduce};
use crate::patch_data::{DataSet, PatchScalar};
use crate::patch_level::PatchLevel;
use crate::variable::DescriptorId;
use num_traits::{One, Zero};
use std::marker::PhantomData;
use std::sync::Arc;

/// Element-wise arithmetic, norms and inner products over the patch data of
/// a hierarchy, generic over the scalar kind and dispatching on the data's
/// centering tag. Arithmetic acts on patch interiors; norms weighted by a
/// control-volume entry extend over the control volume's ghost box, so
/// boundary weighting conventions decide what counts.
///
/// Reductions sum (or maximize) locally and then perform a single collective
/// reduction; complex results reduce real and imaginary parts separately.
pub struct HierarchyDataOps<T> {
    hierarchy: Arc<PatchHierarchy>,
    coarsest: usize,
    finest: usize,
    _marker: PhantomData<T>,
}

// ============================================================================
impl<T: PatchScalar> HierarchyDataOps<T> {
    pub fn new(hierarchy: Arc<PatchHierarchy>, coarsest: usize, finest: usize) -> Self {
        assert!(coarsest <= finest && finest < hierarchy.num_levels());
        Self {
            hierarchy,
            coarsest,
            finest,
            _marker: PhantomData,
        }
    }

    fn levels(&self) -> Vec<Arc<PatchLevel>> {
        (self.coarsest..=self.finest)
            .map(|ln| self.hierarchy.level(ln))
            .collect()
    }

    fn comm(&self) -> Arc<dyn Communicator> {
        self.hierarchy.comm().clone()
    }

    /// Apply `f(dst_slot, operands)` on every interior data point. Operand
    /// sets are cloned up front so that an operand may alias the
    /// destination.
    fn transform<F>(&self, dst: DescriptorId, operands: &[DescriptorId], f: F)
    where
        F: Fn(&[T]) -> T,
    {
        for level in self.levels() {
            for lock in level.patches() {
                let mut patch = lock.write().unwrap();
                let sources: Vec<DataSet<T>> = operands
                    .iter()
                    .map(|&id| patch.data(id).as_set::<T>().clone())
                    .collect();
                let interior = patch.space().clone();
                let data = patch.data_mut(dst).as_set_mut::<T>();
                let mut values = vec![T::zero(); operands.len()];
                for c in 0..data.num_components() {
                    let region = data
                        .centering()
                        .component_space(&interior, c)
                        .intersect(data.component(c).space());
                    for index in region.iter() {
                        for d in 0..data.depth() {
                            for (v, s) in values.iter_mut().zip(&sources) {
                                *v = s.component(c).get(&index, d);
                            }
                            data.component_mut(c).set(&index, d, f(&values));
                        }
                    }
                }
            }
        }
    }

    pub fn copy_data(&self, dst: DescriptorId, src: DescriptorId) {
        if dst == src {
            return;
        }
        for level in self.levels() {
            for lock in level.patches() {
                let mut patch = lock.write().unwrap();
                let region = patch.data(dst).cell_box().grow(&patch.data(dst).ghost());
                patch.copy_between(dst, src, &region);
            }
        }
    }

    /// Exchange the storage of two descriptors on every patch.
    pub fn swap_data(&self, a: DescriptorId, b: DescriptorId) {
        if a == b {
            return;
        }
        for level in self.levels() {
            for lock in level.patches() {
                let mut patch = lock.write().unwrap();
                let data_a = patch.replace_data(a, None);
                let data_b = patch.replace_data(b, data_a);
                patch.replace_data(a, data_b);
            }
        }
    }

    pub fn set_to_scalar(&self, dst: DescriptorId, alpha: T) {
        for level in self.levels() {
            for lock in level.patches() {
                let mut patch = lock.write().unwrap();
                patch.data_mut(dst).as_set_mut::<T>().fill_all(alpha);
            }
        }
    }

    pub fn scale(&self, dst: DescriptorId, alpha: T, src: DescriptorId) {
        self.transform(dst, &[src], |v| alpha * v[0]);
    }

    pub fn add_scalar(&self, dst: DescriptorId, src: DescriptorId, alpha: T) {
        self.transform(dst, &[src], |v| v[0] + alpha);
    }

    pub fn add(&self, dst: DescriptorId, a: DescriptorId, b: DescriptorId) {
        self.transform(dst, &[a, b], |v| v[0] + v[1]);
    }

    pub fn subtract(&self, dst: DescriptorId, a: DescriptorId, b: DescriptorId) {
        self.transform(dst, &[a, b], |v| v[0] - v[1]);
    }

    pub fn multiply(&self, dst: DescriptorId, a: DescriptorId, b: DescriptorId) {
        self.transform(dst, &[a, b], |v| v[0] * v[1]);
    }

    pub fn divide(&self, dst: DescriptorId, a: DescriptorId, b: DescriptorId) {
        self.transform(dst, &[a, b], |v| v[0] / v[1]);
    }

    pub fn reciprocal(&self, dst: DescriptorId, src: DescriptorId) {
        self.transform(dst, &[src], |v| T::one() / v[0]);
    }

    /// `dst = alpha * a + beta * b`.
    pub fn linear_sum(&self, dst: DescriptorId, alpha: T, a: DescriptorId, beta: T, b: DescriptorId) {
        self.transform(dst, &[a, b], |v| alpha * v[0] + beta * v[1]);
    }

    /// `dst = alpha * x + y`.
    pub fn axpy(&self, dst: DescriptorId, alpha: T, x: DescriptorId, y: DescriptorId) {
        self.transform(dst, &[x, y], |v| alpha * v[0] + v[1]);
    }

    /// `dst = alpha * x - y`.
    pub fn axmy(&self, dst: DescriptorId, alpha: T, x: DescriptorId, y: DescriptorId) {
        self.transform(dst, &[x, y], |v| alpha * v[0] - v[1]);
    }

    pub fn abs(&self, dst: DescriptorId, src: DescriptorId) {
        self.transform(dst, &[src], |v| v[0].abs_value());
    }

    /// Write the pointwise modulus of the source into a double-precision
    /// destination of the same centering; the complex engines' form of
    /// `abs`.
    pub fn magnitude(&self, dst: DescriptorId, src: DescriptorId) {
        for level in self.levels() {
            for lock in level.patches() {
                let mut patch = lock.write().unwrap();
                let source = patch.data(src).as_set::<T>().clone();
                let interior = patch.space().clone();
                let data = patch.data_mut(dst).as_double_mut();
                for c in 0..data.num_components() {
                    let region = data
                        .centering()
                        .component_space(&interior, c)
                        .intersect(data.component(c).space());
                    for index in region.iter() {
                        for d in 0..data.depth() {
                            let value = source.component(c).get(&index, d).magnitude();
                            data.component_mut(c).set(&index, d, value);
                        }
                    }
                }
            }
        }
    }

    pub fn set_random_values(&self, dst: DescriptorId, width: T, low: T) {
        let mut rng = rand::thread_rng();
        for level in self.levels() {
            for lock in level.patches() {
                let mut patch = lock.write().unwrap();
                let data = patch.data_mut(dst).as_set_mut::<T>();
                for c in 0..data.num_components() {
                    for slot in data.component_mut(c).values_mut() {
                        *slot = T::random(&mut rng, width, low);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Norms and inner products.

    /// The number of data points (times depth). With `interior_only`,
    /// points shared by several patches of one level are counted once:
    /// each patch contributes its interior data boxes minus those of the
    /// patches before it.
    pub fn number_of_entries(&self, id: DescriptorId, interior_only: bool) -> usize {
        let mut entries = 0usize;
        for level in self.levels() {
            if interior_only {
                let mut seen_per_component: Vec<Vec<IndexSpace>> = Vec::new();
                for lock in level.patches() {
                    let patch = lock.read().unwrap();
                    let data = patch.data(id).as_set::<T>();
                    let centering = data.centering();
                    if seen_per_component.is_empty() {
                        seen_per_component =
                            vec![Vec::new(); centering.num_components(patch.dim())];
                    }
                    for c in 0..data.num_components() {
                        let space = centering.component_space(patch.space(), c);
                        for piece in space.remove_intersections(&seen_per_component[c]) {
                            entries += piece.len() * data.depth();
                        }
                        seen_per_component[c].push(space);
                    }
                }
            } else {
                for lock in level.patches() {
                    let patch = lock.read().unwrap();
                    let data = patch.data(id).as_set::<T>();
                    let ghost_box = data.ghost_cell_box();
                    for c in 0..data.num_components() {
                        let space = data.centering().component_space(&ghost_box, c);
                        entries += space.len() * data.depth();
                    }
                }
            }
        }
        // Interior counting dedups within each rank's own patches only; the
        // global count needs the collective sum either way.
        self.comm().all_reduce_sum_usize(entries)
    }

    /// The sum of the control volumes attached to this data's points.
    pub fn sum_control_volumes(&self, id: DescriptorId, cv: DescriptorId) -> f64 {
        let _ = id;
        let mut sum = 0.0;
        for level in self.levels() {
            for lock in level.patches() {
                let patch = lock.read().unwrap();
                let volumes = patch.data(cv).as_double();
                for c in 0..volumes.num_components() {
                    for value in volumes.component(c).values() {
                        sum += *value;
                    }
                }
            }
        }
        self.comm().all_reduce_f64(Reduce::Sum, sum)
    }

    /// Reduce `f(value, weight)` summed over data points. Without a control
    /// volume the domain is the patch interior with unit weight; with one,
    /// the control volume's box with its stored weight.
    fn weighted_sum<F>(&self, id: DescriptorId, cv: Option<DescriptorId>, f: F) -> f64
    where
        F: Fn(T, f64) -> f64,
    {
        let mut sum = 0.0;
        for level in self.levels() {
            for lock in level.patches() {
                let patch = lock.read().unwrap();
                let data = patch.data(id).as_set::<T>();
                match cv {
                    None => {
                        let interior = patch.space().clone();
                        for c in 0..data.num_components() {
                            let region = data
                                .centering()
                                .component_space(&interior, c)
                                .intersect(data.component(c).space());
                            for index in region.iter() {
                                for d in 0..data.depth() {
                                    sum += f(data.component(c).get(&index, d), 1.0);
                                }
                            }
                        }
                    }
                    Some(cv) => {
                        let volumes = patch.data(cv).as_double();
                        for c in 0..data.num_components() {
                            let region = volumes
                                .component(c)
                                .space()
                                .intersect(data.component(c).space());
                            for index in region.iter() {
                                let weight = volumes.component(c).get(&index, 0);
                                for d in 0..data.depth() {
                                    sum += f(data.component(c).get(&index, d), weight);
                                }
                            }
                        }
                    }
                }
            }
        }
        sum
    }

    pub fn l1_norm(&self, id: DescriptorId, cv: Option<DescriptorId>) -> f64 {
        let local = self.weighted_sum(id, cv, |v, w| v.magnitude() * w);
        self.comm().all_reduce_f64(Reduce::Sum, local)
    }

    pub fn l2_norm(&self, id: DescriptorId, cv: Option<DescriptorId>) -> f64 {
        self.dot(id, id, cv).magnitude().sqrt()
    }

    /// L2 norm of the data scaled pointwise by `weight`.
    pub fn weighted_l2_norm(
        &self,
        id: DescriptorId,
        weight: DescriptorId,
        cv: Option<DescriptorId>,
    ) -> f64 {
        let mut local = 0.0;
        for level in self.levels() {
            for lock in level.patches() {
                let patch = lock.read().unwrap();
                let data = patch.data(id).as_set::<T>();
                let scale = patch.data(weight).as_set::<T>();
                let (volumes, region_source) = match cv {
                    Some(cv) => {
                        let v = patch.data(cv).as_double().clone();
                        (Some(v), None)
                    }
                    None => (None, Some(patch.space().clone())),
                };
                for c in 0..data.num_components() {
                    let region = match (&volumes, &region_source) {
                        (Some(v), _) => v
                            .component(c)
                            .space()
                            .intersect(data.component(c).space()),
                        (None, Some(interior)) => data
                            .centering()
                            .component_space(interior, c)
                            .intersect(data.component(c).space()),
                        _ => unreachable!(),
                    };
                    for index in region.iter() {
                        let w = volumes
                            .as_ref()
                            .map_or(1.0, |v| v.component(c).get(&index, 0));
                        for d in 0..data.depth() {
                            let scaled = scale.component(c).get(&index, d)
                                * data.component(c).get(&index, d);
                            local += scaled.magnitude().powi(2) * w;
                        }
                    }
                }
            }
        }
        self.comm().all_reduce_f64(Reduce::Sum, local).sqrt()
    }

    /// Root-mean-square norm: the L2 norm over the square root of the total
    /// volume (the control-volume sum, or the interior entry count without
    /// one).
    pub fn rms_norm(&self, id: DescriptorId, cv: Option<DescriptorId>) -> f64 {
        let l2 = self.l2_norm(id, cv);
        let volume = match cv {
            Some(cv) => self.sum_control_volumes(id, cv),
            None => self.number_of_entries(id, true) as f64,
        };
        l2 / volume.sqrt()
    }

    /// The maximum modulus. With a control volume, only points carrying a
    /// positive weight participate.
    pub fn max_norm(&self, id: DescriptorId, cv: Option<DescriptorId>) -> f64 {
        let local = self.weighted_max(id, cv);
        self.comm().all_reduce_f64(Reduce::Max, local)
    }

    fn weighted_max(&self, id: DescriptorId, cv: Option<DescriptorId>) -> f64 {
        let mut result: f64 = 0.0;
        for level in self.levels() {
            for lock in level.patches() {
                let patch = lock.read().unwrap();
                let data = patch.data(id).as_set::<T>();
                match cv {
                    None => {
                        let interior = patch.space().clone();
                        for c in 0..data.num_components() {
                            let region = data
                                .centering()
                                .component_space(&interior, c)
                                .intersect(data.component(c).space());
                            for index in region.iter() {
                                for d in 0..data.depth() {
                                    result = result.max(data.component(c).get(&index, d).magnitude());
                                }
                            }
                        }
                    }
                    Some(cv) => {
                        let volumes = patch.data(cv).as_double();
                        for c in 0..data.num_components() {
                            let region = volumes
                                .component(c)
                                .space()
                                .intersect(data.component(c).space());
                            for index in region.iter() {
                                if volumes.component(c).get(&index, 0) > 0.0 {
                                    for d in 0..data.depth() {
                                        result = result
                                            .max(data.component(c).get(&index, d).magnitude());
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        result
    }

    /// The inner product `sum a * conj(b)`, weighted by the control volume
    /// when given.
    pub fn dot(&self, a: DescriptorId, b: DescriptorId, cv: Option<DescriptorId>) -> T {
        let mut local = T::zero();
        for level in self.levels() {
            for lock in level.patches() {
                let patch = lock.read().unwrap();
                let data_a = patch.data(a).as_set::<T>();
                let data_b = patch.data(b).as_set::<T>();
                match cv {
                    None => {
                        let interior = patch.space().clone();
                        for c in 0..data_a.num_components() {
                            let region = data_a
                                .centering()
                                .component_space(&interior, c)
                                .intersect(data_a.component(c).space());
                            for index in region.iter() {
                                for d in 0..data_a.depth() {
                                    local += data_a.component(c).get(&index, d)
                                        * data_b.component(c).get(&index, d).conjugate();
                                }
                            }
                        }
                    }
                    Some(cv) => {
                        let volumes = patch.data(cv).as_double();
                        for c in 0..data_a.num_components() {
                            let region = volumes
                                .component(c)
                                .space()
                                .intersect(data_a.component(c).space());
                            for index in region.iter() {
                                let weight = T::from_f64(volumes.component(c).get(&index, 0));
                                for d in 0..data_a.depth() {
                                    local += data_a.component(c).get(&index, d)
                                        * data_b.component(c).get(&index, d).conjugate()
                                        * weight;
                                }
                            }
                        }
                    }
                }
            }
        }
        self.reduce_scalar_sum(local)
    }

    /// The control-volume weighted integral of the data.
    pub fn integral(&self, id: DescriptorId, cv: DescriptorId) -> T {
        let mut local = T::zero();
        for level in self.levels() {
            for lock in level.patches() {
                let patch = lock.read().unwrap();
                let data = patch.data(id).as_set::<T>();
                let volumes = patch.data(cv).as_double();
                for c in 0..data.num_components() {
                    let region = volumes
                        .component(c)
                        .space()
                        .intersect(data.component(c).space());
                    for index in region.iter() {
                        let weight = T::from_f64(volumes.component(c).get(&index, 0));
                        for d in 0..data.depth() {
                            local += data.component(c).get(&index, d) * weight;
                        }
                    }
                }
            }
        }
        self.reduce_scalar_sum(local)
    }

    fn reduce_scalar_sum(&self, local: T) -> T {
        let comm = self.comm();
        if comm.size() == 1 {
            return local;
        }
        let (re, im) = local.to_parts();
        let re = comm.all_reduce_f64(Reduce::Sum, re);
        let im = comm.all_reduce_f64(Reduce::Sum, im);
        T::from_parts(re, im)
    }
}

