// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::{Transform, TransformType, TransformWeakref};

/// A resizable stack of transforms, each paired with a weakref slot that a
/// raster builder can fill in when the transform is staged.
///
/// Operations producing a new top clear its weakref.
#[derive(Clone, Debug, Default)]
pub struct TransformStack {
    transforms: Vec<Transform>,
    weakrefs: Vec<TransformWeakref>,
}

impl TransformStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            transforms: Vec::with_capacity(capacity),
            weakrefs: Vec::with_capacity(capacity),
        }
    }

    pub fn depth(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn top(&self) -> Option<&Transform> {
        self.transforms.last()
    }

    pub fn top_weakref(&mut self) -> Option<&mut TransformWeakref> {
        self.weakrefs.last_mut()
    }

    /// Returns all transforms, bottom first.
    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    /// Returns the transforms together with their weakref slots.
    pub fn split_mut(&mut self) -> (&[Transform], &mut [TransformWeakref]) {
        (&self.transforms, &mut self.weakrefs)
    }

    /// Returns the current depth, to be passed to [`TransformStack::restore`].
    pub fn save(&self) -> usize {
        self.depth()
    }

    pub fn restore(&mut self, depth: usize) {
        self.transforms.truncate(depth);
        self.weakrefs.truncate(depth);
    }

    /// Classifies the top of the stack.
    pub fn classify(&self) -> TransformType {
        self.top()
            .map_or(TransformType::Invalid, Transform::classify)
    }

    fn push(&mut self, transform: Transform) -> TransformType {
        let ty = transform.classify();
        if ty != TransformType::Invalid {
            self.transforms.push(transform);
            self.weakrefs.push(TransformWeakref::INVALID);
        }
        ty
    }

    fn replace_top(&mut self, transform: Transform) {
        if let (Some(top), Some(weakref)) = (self.transforms.last_mut(), self.weakrefs.last_mut())
        {
            *top = transform;
            *weakref = TransformWeakref::INVALID;
        }
    }

    /// Pushes a general 3x3 matrix, normalizing it by `w2`.
    ///
    /// A zero `w2` is rejected as invalid and nothing is pushed.
    #[allow(clippy::too_many_arguments, reason = "Matches the matrix layout")]
    pub fn push_matrix(
        &mut self,
        sx: f32,
        shx: f32,
        tx: f32,
        shy: f32,
        sy: f32,
        ty: f32,
        w0: f32,
        w1: f32,
        w2: f32,
    ) -> TransformType {
        match Transform::from_3x3([[sx, shx, tx], [shy, sy, ty], [w0, w1, w2]]) {
            Some(transform) => self.push(transform),
            None => TransformType::Invalid,
        }
    }

    pub fn push_transform(&mut self, transform: Transform) -> TransformType {
        self.push(transform)
    }

    pub fn push_identity(&mut self) {
        self.push(Transform::IDENTITY);
    }

    pub fn push_affine(&mut self, sx: f32, shx: f32, tx: f32, shy: f32, sy: f32, ty: f32) {
        self.push(Transform::new([sx, shx, tx, shy, sy, ty, 0.0, 0.0]));
    }

    pub fn push_translate(&mut self, tx: f32, ty: f32) {
        self.push(Transform::translate(tx, ty));
    }

    pub fn push_scale(&mut self, sx: f32, sy: f32) {
        self.push(Transform::scale(sx, sy));
    }

    pub fn push_shear(&mut self, shx: f32, shy: f32) {
        self.push_affine(1.0, shx, 0.0, shy, 1.0, 0.0);
    }

    pub fn push_skew_x(&mut self, theta: f32) {
        self.push_affine(1.0, theta.tan(), 0.0, 0.0, 1.0, 0.0);
    }

    pub fn push_skew_y(&mut self, theta: f32) {
        self.push_affine(1.0, 0.0, 0.0, theta.tan(), 1.0, 0.0);
    }

    pub fn push_rotate(&mut self, theta: f32) {
        let (s, c) = theta.sin_cos();
        self.push_affine(c, -s, 0.0, s, c, 0.0);
    }

    /// Rotates around `(cx, cy)` and moves that point to `(tx, ty)`.
    pub fn push_rotate_xy2(&mut self, theta: f32, cx: f32, cy: f32, tx: f32, ty: f32) {
        self.push_translate(tx, ty);
        self.push_rotate(theta);
        self.multiply();
        self.push_translate(-cx, -cy);
        self.multiply();
    }

    /// Rotates around `(cx, cy)`.
    pub fn push_rotate_xy(&mut self, theta: f32, cx: f32, cy: f32) {
        self.push_rotate_xy2(theta, cx, cy, cx, cy);
    }

    /// Rotates and scales around `(cx, cy)`.
    pub fn push_rotate_scale_xy(&mut self, theta: f32, sx: f32, sy: f32, cx: f32, cy: f32) {
        self.push_translate(cx, cy);
        self.push_rotate(theta);
        self.multiply();
        self.push_scale(sx, sy);
        self.multiply();
        self.push_translate(-cx, -cy);
        self.multiply();
    }

    pub fn dup(&mut self) {
        if let (Some(&top), Some(&weakref)) = (self.transforms.last(), self.weakrefs.last()) {
            self.transforms.push(top);
            self.weakrefs.push(weakref);
        }
    }

    pub fn drop(&mut self) {
        self.transforms.pop();
        self.weakrefs.pop();
    }

    /// Replaces the top with `second * top`, keeping the depth.
    pub fn concat(&mut self) {
        let n = self.depth();
        if n < 2 {
            return;
        }
        let product = self.transforms[n - 2] * self.transforms[n - 1];
        self.replace_top(product);
    }

    /// Pops the two topmost transforms and pushes `second * top`.
    pub fn multiply(&mut self) {
        let n = self.depth();
        if n < 2 {
            return;
        }
        let product = self.transforms[n - 2] * self.transforms[n - 1];
        self.drop();
        self.replace_top(product);
    }

    /// Returns the adjoint of the top transform as a full 3x3 matrix.
    ///
    /// The adjoint is not divided by the determinant: it is the inverse only
    /// up to a scale factor.
    pub fn adjoint(&self) -> Option<[[f32; 3]; 3]> {
        self.top().map(|t| adjoint(&t.to_3x3()))
    }

    /// Pushes the projective map from the unit square to `quad`.
    ///
    /// The corners `(0,0) (1,0) (1,1) (0,1)` map to `quad[0..4]` in order.
    pub fn push_unit_to_quad(&mut self, quad: [[f32; 2]; 4]) -> TransformType {
        match unit_to_quad(quad) {
            Some(transform) => self.push(transform),
            None => TransformType::Invalid,
        }
    }

    /// Pushes the projective map from `quad` to the unit square.
    pub fn push_quad_to_unit(&mut self, quad: [[f32; 2]; 4]) -> TransformType {
        match unit_to_quad(quad).and_then(|t| Transform::from_3x3(adjoint(&t.to_3x3()))) {
            Some(transform) => self.push(transform),
            None => TransformType::Invalid,
        }
    }

    /// Pushes the projective map taking `src` to `dst`.
    pub fn push_quad_to_quad(&mut self, src: [[f32; 2]; 4], dst: [[f32; 2]; 4]) -> TransformType {
        let depth = self.save();
        if self.push_unit_to_quad(dst) == TransformType::Invalid
            || self.push_quad_to_unit(src) == TransformType::Invalid
        {
            self.restore(depth);
            return TransformType::Invalid;
        }
        self.multiply();
        self.classify()
    }

    /// Pushes the map taking the rectangle `(x0, y0)-(x1, y1)` to `quad`.
    pub fn push_rect_to_quad(
        &mut self,
        x0: f32,
        y0: f32,
        x1: f32,
        y1: f32,
        quad: [[f32; 2]; 4],
    ) -> TransformType {
        let (w, h) = (x1 - x0, y1 - y0);
        if w == 0.0 || h == 0.0 {
            return TransformType::Invalid;
        }
        let Some(u2q) = unit_to_quad(quad) else {
            return TransformType::Invalid;
        };
        let r2u = Transform::new([1.0 / w, 0.0, -x0 / w, 0.0, 1.0 / h, -y0 / h, 0.0, 0.0]);
        match u2q.checked_mul(&r2u) {
            Some(transform) => self.push(transform),
            None => TransformType::Invalid,
        }
    }
}

fn adjoint(m: &[[f32; 3]; 3]) -> [[f32; 3]; 3] {
    let cofactor = |r0: usize, r1: usize, c0: usize, c1: usize| {
        m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]
    };
    [
        [cofactor(1, 2, 1, 2), -cofactor(0, 2, 1, 2), cofactor(0, 1, 1, 2)],
        [-cofactor(1, 2, 0, 2), cofactor(0, 2, 0, 2), -cofactor(0, 1, 0, 2)],
        [cofactor(1, 2, 0, 1), -cofactor(0, 2, 0, 1), cofactor(0, 1, 0, 1)],
    ]
}

/// Heckbert's square-to-quad mapping.
///
/// Returns `None` for degenerate quads, without dividing by zero.
fn unit_to_quad(quad: [[f32; 2]; 4]) -> Option<Transform> {
    let [[x0, y0], [x1, y1], [x2, y2], [x3, y3]] = quad;
    let dx3 = x0 - x1 + x2 - x3;
    let dy3 = y0 - y1 + y2 - y3;
    let transform = if dx3 == 0.0 && dy3 == 0.0 {
        Transform::new([x1 - x0, x2 - x1, x0, y1 - y0, y2 - y1, y0, 0.0, 0.0])
    } else {
        let dx1 = x1 - x2;
        let dy1 = y1 - y2;
        let dx2 = x3 - x2;
        let dy2 = y3 - y2;
        let wx_den = dx1 * dy2 - dx2 * dy1;
        if wx_den == 0.0 {
            return None;
        }
        let w0 = (dx3 * dy2 - dx2 * dy3) / wx_den;
        let w1 = (dx1 * dy3 - dx3 * dy1) / wx_den;
        Transform::new([
            x1 - x0 + w0 * x1,
            x3 - x0 + w1 * x3,
            x0,
            y1 - y0 + w0 * y1,
            y3 - y0 + w1 * y3,
            y0,
            w0,
            w1,
        ])
    };
    let det = transform.sx * transform.sy - transform.shx * transform.shy;
    (det != 0.0 && transform.classify() != TransformType::Invalid).then_some(transform)
}

#[cfg(test)]
mod tests {
    use super::TransformStack;
    use crate::math::mul_3x3;
    use crate::{Epoch, Transform, TransformType, TransformWeakref};

    const QUAD: [[f32; 2]; 4] = [[10.0, 10.0], [50.0, 20.0], [40.0, 60.0], [5.0, 45.0]];

    fn is_inverse(a: &Transform, b: &Transform) -> bool {
        let m = mul_3x3(&a.to_3x3(), &b.to_3x3());
        let s = m[2][2];
        (0..3).all(|i| (0..3).all(|j| (m[i][j] / s - f32::from(u8::from(i == j))).abs() < 1e-4))
    }

    fn approx(a: [f32; 2], b: [f32; 2]) -> bool {
        (a[0] - b[0]).abs() < 1e-3 && (a[1] - b[1]).abs() < 1e-3
    }

    #[test]
    fn concat_keeps_depth() {
        let mut ts = TransformStack::new();
        ts.push_identity();
        ts.push_scale(2.0, 3.0);
        ts.concat();
        assert_eq!(ts.depth(), 2);
        assert_eq!(
            *ts.top().unwrap(),
            Transform::new([2.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0])
        );
    }

    #[test]
    fn multiply_pops() {
        let mut ts = TransformStack::new();
        ts.push_translate(5.0, 7.0);
        ts.push_scale(2.0, 2.0);
        ts.multiply();
        assert_eq!(ts.depth(), 1);
        assert_eq!(ts.top().unwrap().apply([1.0, 1.0]), Some([7.0, 9.0]));
    }

    #[test]
    fn save_restore_dup_drop() {
        let mut ts = TransformStack::new();
        ts.push_identity();
        let depth = ts.save();
        ts.push_rotate(1.0);
        ts.dup();
        assert_eq!(ts.depth(), 3);
        ts.drop();
        assert_eq!(ts.depth(), 2);
        ts.restore(depth);
        assert_eq!(ts.depth(), 1);
        assert_eq!(*ts.top().unwrap(), Transform::IDENTITY);
    }

    #[test]
    fn dup_copies_weakref() {
        let epoch = Epoch::new();
        let mut ts = TransformStack::new();
        ts.push_identity();
        *ts.top_weakref().unwrap() = TransformWeakref::new(&epoch, 4);
        ts.dup();
        assert_eq!(ts.top_weakref().unwrap().get_index(&epoch), Some(4));
        ts.concat();
        assert_eq!(ts.top_weakref().unwrap().get_index(&epoch), None);
    }

    #[test]
    fn rotate_xy_fixes_center() {
        let mut ts = TransformStack::new();
        ts.push_rotate_xy(1.2, 3.0, 4.0);
        assert_eq!(ts.depth(), 1);
        assert!(approx(ts.top().unwrap().apply([3.0, 4.0]).unwrap(), [3.0, 4.0]));
        ts.push_rotate_scale_xy(0.3, 2.0, 2.0, 1.0, 1.0);
        assert_eq!(ts.depth(), 2);
        assert!(approx(ts.top().unwrap().apply([1.0, 1.0]).unwrap(), [1.0, 1.0]));
    }

    #[test]
    fn push_matrix_normalizes() {
        let mut ts = TransformStack::new();
        let ty = ts.push_matrix(2.0, 0.0, 2.0, 0.0, 2.0, 2.0, 0.0, 0.0, 2.0);
        assert_eq!(ty, TransformType::Affine);
        assert_eq!(*ts.top().unwrap(), Transform::new([1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0]));
        let ty = ts.push_matrix(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0);
        assert_eq!(ty, TransformType::Invalid);
        assert_eq!(ts.depth(), 1);
    }

    #[test]
    fn unit_to_quad_maps_corners() {
        let mut ts = TransformStack::new();
        assert_eq!(ts.push_unit_to_quad(QUAD), TransformType::Projective);
        let t = ts.top().unwrap();
        for (unit, corner) in [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]].iter().zip(QUAD) {
            assert!(approx(t.apply(*unit).unwrap(), corner));
        }
    }

    #[test]
    fn quad_to_unit_inverts() {
        let mut ts = TransformStack::new();
        ts.push_unit_to_quad(QUAD);
        ts.push_quad_to_unit(QUAD);
        let n = ts.depth();
        assert!(is_inverse(&ts.transforms()[n - 2], &ts.transforms()[n - 1]));
        assert!(approx(ts.top().unwrap().apply(QUAD[2]).unwrap(), [1.0, 1.0]));
    }

    #[test]
    fn adjoint_is_unnormalized() {
        let mut ts = TransformStack::new();
        ts.push_scale(2.0, 4.0);
        let adj = ts.adjoint().unwrap();
        // det * inverse
        assert_eq!(adj, [[4.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 8.0]]);
    }

    #[test]
    fn quad_to_quad() {
        let dst = [[0.0, 0.0], [8.0, 0.0], [8.0, 8.0], [0.0, 8.0]];
        let mut ts = TransformStack::new();
        assert_ne!(ts.push_quad_to_quad(QUAD, dst), TransformType::Invalid);
        assert_eq!(ts.depth(), 1);
        let t = ts.top().unwrap();
        for (src, dst) in QUAD.iter().zip(dst) {
            assert!(approx(t.apply(*src).unwrap(), dst));
        }
    }

    #[test]
    fn rect_to_quad() {
        let mut ts = TransformStack::new();
        let ty = ts.push_rect_to_quad(0.0, 0.0, 2.0, 2.0, QUAD);
        assert_eq!(ty, TransformType::Projective);
        assert!(approx(ts.top().unwrap().apply([2.0, 2.0]).unwrap(), QUAD[2]));
    }

    #[test]
    fn degenerate_quad_is_invalid() {
        let collinear = [[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [3.0, 0.0]];
        let mut ts = TransformStack::new();
        ts.push_identity();
        assert_eq!(
            ts.push_rect_to_quad(0.0, 0.0, 1.0, 1.0, collinear),
            TransformType::Invalid
        );
        assert_eq!(ts.push_unit_to_quad([[0.0; 2]; 4]), TransformType::Invalid);
        assert_eq!(ts.push_quad_to_quad(collinear, QUAD), TransformType::Invalid);
        assert_eq!(ts.depth(), 1);
        assert!(ts.top().unwrap().to_array().iter().all(|x| x.is_finite()));
    }
}
