use crate::index_space::IndexSpace;
use crate::int_vector::IntVector;
use num_complex::Complex64;
use num_traits::Zero;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Where data lives relative to the cells of a patch. `Cell` values sit in
/// cell volumes; `Node` values at the corner points; `Face` and `Side`
/// values on the cell faces normal to one axis (same geometry, different
/// registration conventions); `Edge` values on the cell edges parallel to
/// one axis. The `Outer` variants live only on the boundary faces of the
/// patch and hold flux integrals for refluxing.
#[derive(Clone, Copy, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
pub enum Centering {
    Cell,
    Node,
    Face,
    Side,
    Edge,
    OuterFace,
    OuterSide,
}

impl Centering {
    pub fn num_components(&self, dim: usize) -> usize {
        match self {
            Centering::Cell | Centering::Node => 1,
            Centering::Face | Centering::Side | Centering::Edge => dim,
            Centering::OuterFace | Centering::OuterSide => 2 * dim,
        }
    }

    /// The data extent of one component over a box of cells. Node-like axes
    /// carry one more point than cells; outer components collapse their
    /// normal axis onto a single face plane of the box.
    pub fn component_space(&self, cell_box: &IndexSpace, component: usize) -> IndexSpace {
        let dim = cell_box.dim();
        match self {
            Centering::Cell => cell_box.clone(),
            Centering::Node => cell_box.grow_upper_all(1),
            Centering::Face | Centering::Side => cell_box.grow_upper(component, 1),
            Centering::Edge => {
                let mut space = cell_box.clone();
                for a in 0..dim {
                    if a != component {
                        space = space.grow_upper(a, 1);
                    }
                }
                space
            }
            Centering::OuterFace | Centering::OuterSide => {
                let axis = component / 2;
                let side = component % 2;
                let face = if side == 0 {
                    cell_box.lower()[axis]
                } else {
                    cell_box.upper()[axis] + 1
                };
                let mut lower = cell_box.lower();
                let mut upper = cell_box.upper();
                lower[axis] = face;
                upper[axis] = face;
                IndexSpace::new(lower, upper)
            }
        }
    }

    /// Whether any data point of this centering can coincide with a point of
    /// a neighboring patch. Data on patch borders participates in the
    /// fine-priority transaction queue; cell-like data never does.
    pub fn lives_on_patch_border(&self) -> bool {
        !matches!(self, Centering::Cell)
    }
}

/// The index of the edge-centered value attached to `cell`, for the edge
/// parallel to `axis`, selected by `corner`. Bit zero of `corner` offsets
/// the next axis around, bit one the axis after that. In 2D the corners are
/// `Lower = 0` and `Upper = 1`; in 3D, `LowerLeft = 0`, `LowerRight = 1`,
/// `UpperLeft = 2`, `UpperRight = 3`.
pub fn edge_index(cell: &IntVector, axis: usize, corner: usize) -> IntVector {
    let dim = cell.dim();
    let mut index = *cell;
    if dim > 1 {
        index[(axis + 1) % dim] += (corner & 1) as i64;
    }
    if dim > 2 {
        index[(axis + 2) % dim] += ((corner >> 1) & 1) as i64;
    }
    index
}

/// The scalar kinds patch data can hold.
#[derive(Clone, Copy, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
pub enum ScalarKind {
    Int,
    Float,
    Double,
    Complex,
}

/// The arithmetic scalar behind a patch-data array. Implemented for `i32`,
/// `f32`, `f64` and `Complex64`; the data-ops engine is generic over this
/// trait so each operation is written once.
pub trait PatchScalar:
    Copy
    + Default
    + PartialEq
    + Send
    + Sync
    + Serialize
    + DeserializeOwned
    + num_traits::NumAssign
    + std::fmt::Debug
    + 'static
{
    const KIND: ScalarKind;

    /// The modulus, as used by L1/max norms.
    fn magnitude(self) -> f64;

    /// The element with the same modulus and no phase; for real scalars the
    /// absolute value.
    fn abs_value(self) -> Self;

    /// The complex conjugate; identity for real scalars.
    fn conjugate(self) -> Self;

    fn from_f64(x: f64) -> Self;

    /// Linear blend `(1 - w) * a + w * b`, used by time interpolation.
    fn lerp(a: Self, b: Self, w: f64) -> Self;

    fn random<R: Rng>(rng: &mut R, width: Self, low: Self) -> Self;

    /// Split into (real, imaginary) parts for transports that lack a native
    /// complex type; real scalars report a zero imaginary part.
    fn to_parts(self) -> (f64, f64);

    fn from_parts(re: f64, im: f64) -> Self;

    /// The data set of this scalar kind inside a [`PatchData`] entry, if the
    /// entry holds this kind.
    fn data_of(data: &PatchData) -> Option<&DataSet<Self>>;

    fn data_of_mut(data: &mut PatchData) -> Option<&mut DataSet<Self>>;
}

impl PatchScalar for i32 {
    const KIND: ScalarKind = ScalarKind::Int;

    fn magnitude(self) -> f64 {
        (self as f64).abs()
    }

    fn abs_value(self) -> Self {
        self.abs()
    }

    fn conjugate(self) -> Self {
        self
    }

    fn from_f64(x: f64) -> Self {
        x as i32
    }

    fn lerp(_: Self, _: Self, _: f64) -> Self {
        panic!("integer patch data cannot be time interpolated")
    }

    fn random<R: Rng>(rng: &mut R, width: Self, low: Self) -> Self {
        low + (rng.gen::<f64>() * width as f64) as i32
    }

    fn to_parts(self) -> (f64, f64) {
        (self as f64, 0.0)
    }

    fn from_parts(re: f64, _im: f64) -> Self {
        re as i32
    }

    fn data_of(data: &PatchData) -> Option<&DataSet<Self>> {
        match data {
            PatchData::Int(set) => Some(set),
            _ => None,
        }
    }

    fn data_of_mut(data: &mut PatchData) -> Option<&mut DataSet<Self>> {
        match data {
            PatchData::Int(set) => Some(set),
            _ => None,
        }
    }
}

impl PatchScalar for f32 {
    const KIND: ScalarKind = ScalarKind::Float;

    fn magnitude(self) -> f64 {
        (self as f64).abs()
    }

    fn abs_value(self) -> Self {
        self.abs()
    }

    fn conjugate(self) -> Self {
        self
    }

    fn from_f64(x: f64) -> Self {
        x as f32
    }

    fn lerp(a: Self, b: Self, w: f64) -> Self {
        ((1.0 - w) * a as f64 + w * b as f64) as f32
    }

    fn random<R: Rng>(rng: &mut R, width: Self, low: Self) -> Self {
        low + rng.gen::<f32>() * width
    }

    fn to_parts(self) -> (f64, f64) {
        (self as f64, 0.0)
    }

    fn from_parts(re: f64, _im: f64) -> Self {
        re as f32
    }

    fn data_of(data: &PatchData) -> Option<&DataSet<Self>> {
        match data {
            PatchData::Float(set) => Some(set),
            _ => None,
        }
    }

    fn data_of_mut(data: &mut PatchData) -> Option<&mut DataSet<Self>> {
        match data {
            PatchData::Float(set) => Some(set),
            _ => None,
        }
    }
}

impl PatchScalar for f64 {
    const KIND: ScalarKind = ScalarKind::Double;

    fn magnitude(self) -> f64 {
        self.abs()
    }

    fn abs_value(self) -> Self {
        self.abs()
    }

    fn conjugate(self) -> Self {
        self
    }

    fn from_f64(x: f64) -> Self {
        x
    }

    fn lerp(a: Self, b: Self, w: f64) -> Self {
        (1.0 - w) * a + w * b
    }

    fn random<R: Rng>(rng: &mut R, width: Self, low: Self) -> Self {
        low + rng.gen::<f64>() * width
    }

    fn to_parts(self) -> (f64, f64) {
        (self, 0.0)
    }

    fn from_parts(re: f64, _im: f64) -> Self {
        re
    }

    fn data_of(data: &PatchData) -> Option<&DataSet<Self>> {
        match data {
            PatchData::Double(set) => Some(set),
            _ => None,
        }
    }

    fn data_of_mut(data: &mut PatchData) -> Option<&mut DataSet<Self>> {
        match data {
            PatchData::Double(set) => Some(set),
            _ => None,
        }
    }
}

impl PatchScalar for Complex64 {
    const KIND: ScalarKind = ScalarKind::Complex;

    fn magnitude(self) -> f64 {
        self.norm()
    }

    fn abs_value(self) -> Self {
        Complex64::new(self.norm(), 0.0)
    }

    fn conjugate(self) -> Self {
        self.conj()
    }

    fn from_f64(x: f64) -> Self {
        Complex64::new(x, 0.0)
    }

    fn lerp(a: Self, b: Self, w: f64) -> Self {
        a * (1.0 - w) + b * w
    }

    fn random<R: Rng>(rng: &mut R, width: Self, low: Self) -> Self {
        low + Complex64::new(rng.gen::<f64>() * width.re, rng.gen::<f64>() * width.im)
    }

    fn to_parts(self) -> (f64, f64) {
        (self.re, self.im)
    }

    fn from_parts(re: f64, im: f64) -> Self {
        Complex64::new(re, im)
    }

    fn data_of(data: &PatchData) -> Option<&DataSet<Self>> {
        match data {
            PatchData::Complex(set) => Some(set),
            _ => None,
        }
    }

    fn data_of_mut(data: &mut PatchData) -> Option<&mut DataSet<Self>> {
        match data {
            PatchData::Complex(set) => Some(set),
            _ => None,
        }
    }
}

/// A dense row-major array over a box of data indexes, `depth` values per
/// index with the depth varying fastest.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ArrayData<T> {
    space: IndexSpace,
    depth: usize,
    data: Vec<T>,
}

// ============================================================================
impl<T: PatchScalar> ArrayData<T> {
    pub fn new(space: IndexSpace, depth: usize) -> Self {
        assert!(depth > 0);
        let data = vec![T::default(); space.len() * depth];
        Self { space, depth, data }
    }

    pub fn space(&self) -> &IndexSpace {
        &self.space
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn get(&self, index: &IntVector, d: usize) -> T {
        self.data[self.space.offset(index) * self.depth + d]
    }

    pub fn set(&mut self, index: &IntVector, d: usize, value: T) {
        let at = self.space.offset(index) * self.depth + d;
        self.data[at] = value;
    }

    pub fn values(&self) -> &[T] {
        &self.data
    }

    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    pub fn fill_on(&mut self, value: T, region: &IndexSpace) {
        for index in self.space.intersect(region).iter() {
            for d in 0..self.depth {
                self.set(&index, d, value);
            }
        }
    }

    /// Copy values from `src` over `region` (in this array's data space).
    /// A non-zero `shift` reads `src` at `index - shift`, which realizes
    /// copies from periodic images.
    pub fn copy_from(&mut self, src: &ArrayData<T>, region: &IndexSpace, shift: &IntVector) {
        assert_eq!(self.depth, src.depth);
        let readable = src.space.translate(shift);
        let region = self.space.intersect(region).intersect(&readable);
        for index in region.iter() {
            let from = index - *shift;
            for d in 0..self.depth {
                self.set(&index, d, src.get(&from, d));
            }
        }
    }

    /// Serialize the values over `region` in row-major order.
    pub fn pack(&self, region: &IndexSpace) -> Vec<T> {
        let region = self.space.intersect(region);
        let mut out = Vec::with_capacity(region.len() * self.depth);
        for index in region.iter() {
            for d in 0..self.depth {
                out.push(self.get(&index, d));
            }
        }
        out
    }

    /// Write back values packed by [`ArrayData::pack`] over the same region.
    pub fn unpack(&mut self, region: &IndexSpace, values: &[T]) {
        let region = self.space.intersect(region);
        assert_eq!(values.len(), region.len() * self.depth);
        let mut at = 0;
        for index in region.iter() {
            for d in 0..self.depth {
                self.set(&index, d, values[at]);
                at += 1;
            }
        }
    }
}

/// All components of one patch-data entry on one patch: the centering tag,
/// the cell box of the patch, the ghost width, and one [`ArrayData`] per
/// component, each sized to the component's data extent over the ghost box.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct DataSet<T> {
    centering: Centering,
    cell_box: IndexSpace,
    ghost: IntVector,
    depth: usize,
    time: f64,
    components: Vec<ArrayData<T>>,
}

// ============================================================================
impl<T: PatchScalar> DataSet<T> {
    pub fn new(centering: Centering, cell_box: IndexSpace, ghost: IntVector, depth: usize) -> Self {
        let ghost_box = cell_box.grow(&ghost);
        let components = (0..centering.num_components(cell_box.dim()))
            .map(|c| ArrayData::new(centering.component_space(&ghost_box, c), depth))
            .collect();
        Self {
            centering,
            cell_box,
            ghost,
            depth,
            time: 0.0,
            components,
        }
    }

    pub fn centering(&self) -> Centering {
        self.centering
    }

    pub fn cell_box(&self) -> &IndexSpace {
        &self.cell_box
    }

    pub fn ghost_cell_box(&self) -> IndexSpace {
        self.cell_box.grow(&self.ghost)
    }

    pub fn ghost(&self) -> &IntVector {
        &self.ghost
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn dim(&self) -> usize {
        self.cell_box.dim()
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn component(&self, c: usize) -> &ArrayData<T> {
        &self.components[c]
    }

    pub fn component_mut(&mut self, c: usize) -> &mut ArrayData<T> {
        &mut self.components[c]
    }

    pub fn fill_all(&mut self, value: T) {
        for component in &mut self.components {
            component.fill(value);
        }
    }

    /// Fill every component's data points lying over a region of cells.
    pub fn fill_on_cells(&mut self, value: T, cell_region: &IndexSpace) {
        for c in 0..self.components.len() {
            let region = self.centering.component_space(cell_region, c);
            self.components[c].fill_on(value, &region);
        }
    }

    /// Copy from another data set of the same centering and depth, over a
    /// region of cells. The copy covers every data point of each component
    /// attached to those cells, clipped to what both sides actually store.
    /// `shift` displaces the source in data space.
    pub fn copy_on_cells(&mut self, src: &DataSet<T>, cell_region: &IndexSpace, shift: &IntVector) {
        assert_eq!(self.centering, src.centering);
        assert_eq!(self.depth, src.depth);
        for c in 0..self.components.len() {
            let region = self.centering.component_space(cell_region, c);
            self.components[c].copy_from(&src.components[c], &region, shift);
        }
    }

    /// Blend two source data sets at interpolation weight `w` over a region
    /// of cells, writing into this set: `(1 - w) * old + w * new`.
    pub fn time_interpolate_on_cells(
        &mut self,
        old: &DataSet<T>,
        new: &DataSet<T>,
        w: f64,
        cell_region: &IndexSpace,
        shift: &IntVector,
    ) {
        assert_eq!(self.centering, old.centering);
        assert_eq!(self.centering, new.centering);
        let depth = self.depth;
        for c in 0..self.components.len() {
            let region = self.centering.component_space(cell_region, c);
            let dst = &mut self.components[c];
            let readable = old.components[c]
                .space()
                .translate(shift)
                .intersect(&new.components[c].space().translate(shift));
            let region = dst.space().intersect(&region).intersect(&readable);
            for index in region.iter() {
                let from = index - *shift;
                for d in 0..depth {
                    let a = old.components[c].get(&from, d);
                    let b = new.components[c].get(&from, d);
                    dst.set(&index, d, T::lerp(a, b, w));
                }
            }
        }
    }

    /// Sum of all values in all components; used by conservation checks.
    pub fn sum_on_cells(&self, cell_region: &IndexSpace) -> T {
        let mut total = T::zero();
        for c in 0..self.components.len() {
            let region = self.centering.component_space(cell_region, c);
            let region = self.components[c].space().intersect(&region);
            for index in region.iter() {
                for d in 0..self.depth {
                    total += self.components[c].get(&index, d);
                }
            }
        }
        total
    }
}

/// One patch-data entry, dispatching on the scalar kind. The centering tag
/// lives inside the [`DataSet`].
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum PatchData {
    Int(DataSet<i32>),
    Float(DataSet<f32>),
    Double(DataSet<f64>),
    Complex(DataSet<Complex64>),
}

macro_rules! with_set {
    ($self:expr, $set:ident => $body:expr) => {
        match $self {
            PatchData::Int($set) => $body,
            PatchData::Float($set) => $body,
            PatchData::Double($set) => $body,
            PatchData::Complex($set) => $body,
        }
    };
}

// ============================================================================
impl PatchData {
    pub fn new(
        kind: ScalarKind,
        centering: Centering,
        cell_box: IndexSpace,
        ghost: IntVector,
        depth: usize,
    ) -> Self {
        match kind {
            ScalarKind::Int => PatchData::Int(DataSet::new(centering, cell_box, ghost, depth)),
            ScalarKind::Float => PatchData::Float(DataSet::new(centering, cell_box, ghost, depth)),
            ScalarKind::Double => {
                PatchData::Double(DataSet::new(centering, cell_box, ghost, depth))
            }
            ScalarKind::Complex => {
                PatchData::Complex(DataSet::new(centering, cell_box, ghost, depth))
            }
        }
    }

    pub fn kind(&self) -> ScalarKind {
        match self {
            PatchData::Int(_) => ScalarKind::Int,
            PatchData::Float(_) => ScalarKind::Float,
            PatchData::Double(_) => ScalarKind::Double,
            PatchData::Complex(_) => ScalarKind::Complex,
        }
    }

    pub fn centering(&self) -> Centering {
        with_set!(self, set => set.centering())
    }

    pub fn time(&self) -> f64 {
        with_set!(self, set => set.time())
    }

    pub fn set_time(&mut self, time: f64) {
        with_set!(self, set => set.set_time(time))
    }

    pub fn ghost(&self) -> IntVector {
        with_set!(self, set => *set.ghost())
    }

    pub fn depth(&self) -> usize {
        with_set!(self, set => set.depth())
    }

    pub fn cell_box(&self) -> IndexSpace {
        with_set!(self, set => set.cell_box().clone())
    }

    /// Copy from a source entry of the same kind over a cell region.
    pub fn copy_on_cells(&mut self, src: &PatchData, cell_region: &IndexSpace, shift: &IntVector) {
        match (self, src) {
            (PatchData::Int(d), PatchData::Int(s)) => d.copy_on_cells(s, cell_region, shift),
            (PatchData::Float(d), PatchData::Float(s)) => d.copy_on_cells(s, cell_region, shift),
            (PatchData::Double(d), PatchData::Double(s)) => d.copy_on_cells(s, cell_region, shift),
            (PatchData::Complex(d), PatchData::Complex(s)) => {
                d.copy_on_cells(s, cell_region, shift)
            }
            _ => panic!("scalar kind mismatch in patch data copy"),
        }
    }

    pub fn time_interpolate_on_cells(
        &mut self,
        old: &PatchData,
        new: &PatchData,
        w: f64,
        cell_region: &IndexSpace,
        shift: &IntVector,
    ) {
        match (self, old, new) {
            (PatchData::Float(d), PatchData::Float(a), PatchData::Float(b)) => {
                d.time_interpolate_on_cells(a, b, w, cell_region, shift)
            }
            (PatchData::Double(d), PatchData::Double(a), PatchData::Double(b)) => {
                d.time_interpolate_on_cells(a, b, w, cell_region, shift)
            }
            (PatchData::Complex(d), PatchData::Complex(a), PatchData::Complex(b)) => {
                d.time_interpolate_on_cells(a, b, w, cell_region, shift)
            }
            _ => panic!("scalar kind mismatch in time interpolation"),
        }
    }

    /// Serialize the values of every component over a cell region, for
    /// shipping to another rank.
    pub fn pack_on_cells(&self, cell_region: &IndexSpace) -> Vec<u8> {
        with_set!(self, set => {
            let mut parts = Vec::new();
            for c in 0..set.num_components() {
                let region = set.centering().component_space(cell_region, c);
                parts.push(set.component(c).pack(&region));
            }
            rmp_serde::to_vec(&parts).unwrap()
        })
    }

    pub fn unpack_on_cells(&mut self, cell_region: &IndexSpace, bytes: &[u8]) {
        with_set!(self, set => {
            let parts: Vec<Vec<_>> = rmp_serde::from_slice(bytes).unwrap();
            assert_eq!(parts.len(), set.num_components());
            for (c, values) in parts.into_iter().enumerate() {
                let region = set.centering().component_space(cell_region, c);
                set.component_mut(c).unpack(&region, &values);
            }
        })
    }

    pub fn as_double(&self) -> &DataSet<f64> {
        match self {
            PatchData::Double(set) => set,
            _ => panic!("patch data is not double precision"),
        }
    }

    pub fn as_double_mut(&mut self) -> &mut DataSet<f64> {
        match self {
            PatchData::Double(set) => set,
            _ => panic!("patch data is not double precision"),
        }
    }

    pub fn as_set<T: PatchScalar>(&self) -> &DataSet<T> {
        self.try_set()
            .unwrap_or_else(|| panic!("patch data is not of kind {:?}", T::KIND))
    }

    pub fn as_set_mut<T: PatchScalar>(&mut self) -> &mut DataSet<T> {
        self.try_set_mut()
            .unwrap_or_else(|| panic!("patch data is not of kind {:?}", T::KIND))
    }

    fn try_set<T: PatchScalar>(&self) -> Option<&DataSet<T>> {
        T::data_of(self)
    }

    fn try_set_mut<T: PatchScalar>(&mut self) -> Option<&mut DataSet<T>> {
        T::data_of_mut(self)
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::{edge_index, ArrayData, Centering, DataSet};
    use crate::index_space::IndexSpace;
    use crate::int_vector::IntVector;

    #[test]
    fn component_spaces_follow_the_centering() {
        let cells = IndexSpace::from_bounds(&[0, 0], &[9, 4]);
        assert_eq!(Centering::Cell.component_space(&cells, 0).shape(), IntVector::new(&[10, 5]));
        assert_eq!(Centering::Node.component_space(&cells, 0).shape(), IntVector::new(&[11, 6]));
        assert_eq!(Centering::Face.component_space(&cells, 0).shape(), IntVector::new(&[11, 5]));
        assert_eq!(Centering::Face.component_space(&cells, 1).shape(), IntVector::new(&[10, 6]));
        assert_eq!(Centering::Edge.component_space(&cells, 0).shape(), IntVector::new(&[10, 6]));
        assert_eq!(Centering::Edge.component_space(&cells, 1).shape(), IntVector::new(&[11, 5]));

        let lower_face = Centering::OuterFace.component_space(&cells, 0);
        assert_eq!(lower_face.lower()[0], 0);
        assert_eq!(lower_face.upper()[0], 0);
        let upper_face = Centering::OuterFace.component_space(&cells, 1);
        assert_eq!(upper_face.lower()[0], 10);
        assert_eq!(upper_face.shape(), IntVector::new(&[1, 5]));
    }

    #[test]
    fn edge_indexes_offset_the_wrapping_axes() {
        let cell = IntVector::new(&[3, 4, 5]);
        assert_eq!(edge_index(&cell, 0, 0), IntVector::new(&[3, 4, 5]));
        assert_eq!(edge_index(&cell, 0, 1), IntVector::new(&[3, 5, 5]));
        assert_eq!(edge_index(&cell, 0, 2), IntVector::new(&[3, 4, 6]));
        assert_eq!(edge_index(&cell, 1, 1), IntVector::new(&[3, 4, 6]));
        assert_eq!(edge_index(&cell, 2, 3), IntVector::new(&[4, 5, 5]));

        let cell2 = IntVector::new(&[3, 4]);
        assert_eq!(edge_index(&cell2, 0, 1), IntVector::new(&[3, 5]));
        assert_eq!(edge_index(&cell2, 1, 1), IntVector::new(&[4, 4]));
    }

    #[test]
    fn pack_and_unpack_round_trip() {
        let space = IndexSpace::from_bounds(&[0, 0], &[4, 4]);
        let mut a = ArrayData::<f64>::new(space.clone(), 2);
        for (i, index) in space.iter().enumerate() {
            a.set(&index, 0, i as f64);
            a.set(&index, 1, -(i as f64));
        }
        let region = IndexSpace::from_bounds(&[1, 1], &[3, 3]);
        let packed = a.pack(&region);
        assert_eq!(packed.len(), 18);

        let mut b = ArrayData::<f64>::new(space, 2);
        b.unpack(&region, &packed);
        assert_eq!(b.get(&IntVector::new(&[2, 2]), 0), a.get(&IntVector::new(&[2, 2]), 0));
        assert_eq!(b.get(&IntVector::new(&[0, 0]), 0), 0.0);
    }

    #[test]
    fn shifted_copies_read_the_displaced_source() {
        let mut dst = ArrayData::<f64>::new(IndexSpace::from_bounds(&[10, 0], &[14, 4]), 1);
        let mut src = ArrayData::<f64>::new(IndexSpace::from_bounds(&[0, 0], &[4, 4]), 1);
        src.fill(7.0);
        let shift = IntVector::new(&[10, 0]);
        let region = dst.space().clone();
        dst.copy_from(&src, &region, &shift);
        assert_eq!(dst.get(&IntVector::new(&[12, 2]), 0), 7.0);
    }

    #[test]
    fn data_set_time_interpolation_blends() {
        let cells = IndexSpace::from_bounds(&[0, 0], &[3, 3]);
        let ghost = IntVector::zero(2);
        let mut old = DataSet::<f64>::new(Centering::Cell, cells.clone(), ghost, 1);
        let mut new = DataSet::<f64>::new(Centering::Cell, cells.clone(), ghost, 1);
        old.fill_all(1.0);
        new.fill_all(3.0);

        let mut dst = DataSet::<f64>::new(Centering::Cell, cells.clone(), ghost, 1);
        dst.time_interpolate_on_cells(&old, &new, 0.25, &cells, &IntVector::zero(2));
        assert_eq!(dst.component(0).get(&IntVector::new(&[1, 1]), 0), 1.5);
    }
}
