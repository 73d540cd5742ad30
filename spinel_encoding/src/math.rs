// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::ops::Mul;

use bytemuck::{Pod, Zeroable};
use half::f16;
use peniko::kurbo;

/// Projective transformation with an implicit `w2 = 1`.
///
/// ```text
///   | sx  shx tx |
///   | shy sy  ty |
///   | w0  w1  1  |
/// ```
///
/// A transform is affine when `w0 == w1 == 0`.
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Transform {
    pub sx: f32,
    pub shx: f32,
    pub tx: f32,
    pub shy: f32,
    pub sy: f32,
    pub ty: f32,
    pub w0: f32,
    pub w1: f32,
}

/// Classification of a [`Transform`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TransformType {
    /// The transform is degenerate and was not produced.
    Invalid,
    Affine,
    Projective,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    /// Identity transform.
    pub const IDENTITY: Self = Self {
        sx: 1.0,
        shx: 0.0,
        tx: 0.0,
        shy: 0.0,
        sy: 1.0,
        ty: 0.0,
        w0: 0.0,
        w1: 0.0,
    };

    pub const fn new(elements: [f32; 8]) -> Self {
        let [sx, shx, tx, shy, sy, ty, w0, w1] = elements;
        Self {
            sx,
            shx,
            tx,
            shy,
            sy,
            ty,
            w0,
            w1,
        }
    }

    pub const fn translate(tx: f32, ty: f32) -> Self {
        Self::new([1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0])
    }

    pub const fn scale(sx: f32, sy: f32) -> Self {
        Self::new([sx, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0])
    }

    pub fn to_array(&self) -> [f32; 8] {
        [
            self.sx, self.shx, self.tx, self.shy, self.sy, self.ty, self.w0, self.w1,
        ]
    }

    /// Builds a transform from a row-major 3x3 matrix, normalizing by `w2`.
    ///
    /// Returns `None` when `w2` is zero.
    pub fn from_3x3(m: [[f32; 3]; 3]) -> Option<Self> {
        let w2 = m[2][2];
        if w2 == 0.0 {
            return None;
        }
        let s = if w2 == 1.0 { 1.0 } else { 1.0 / w2 };
        Some(Self::new([
            m[0][0] * s,
            m[0][1] * s,
            m[0][2] * s,
            m[1][0] * s,
            m[1][1] * s,
            m[1][2] * s,
            m[2][0] * s,
            m[2][1] * s,
        ]))
    }

    pub fn to_3x3(&self) -> [[f32; 3]; 3] {
        [
            [self.sx, self.shx, self.tx],
            [self.shy, self.sy, self.ty],
            [self.w0, self.w1, 1.0],
        ]
    }

    /// Multiplies two transforms, returning `None` if the product is
    /// degenerate.
    pub fn checked_mul(&self, other: &Self) -> Option<Self> {
        Self::from_3x3(mul_3x3(&self.to_3x3(), &other.to_3x3()))
    }

    pub fn classify(&self) -> TransformType {
        let elements = self.to_array();
        if elements.iter().any(|x| !x.is_finite()) {
            TransformType::Invalid
        } else if self.w0 == 0.0 && self.w1 == 0.0 {
            TransformType::Affine
        } else {
            TransformType::Projective
        }
    }

    pub fn is_affine(&self) -> bool {
        self.classify() == TransformType::Affine
    }

    /// Maps a point, returning `None` if it lands on the line at infinity.
    pub fn apply(&self, p: [f32; 2]) -> Option<[f32; 2]> {
        let [x, y] = p;
        let xp = self.sx * x + self.shx * y + self.tx;
        let yp = self.shy * x + self.sy * y + self.ty;
        let w = self.w0 * x + self.w1 * y + 1.0;
        if w == 1.0 {
            Some([xp, yp])
        } else if w > 0.0 {
            Some([xp / w, yp / w])
        } else {
            None
        }
    }

    /// Creates a transform from a kurbo affine matrix.
    pub fn from_kurbo(transform: &kurbo::Affine) -> Self {
        let [a, b, c, d, e, f] = transform.as_coeffs().map(|x| x as f32);
        Self::new([a, c, e, b, d, f, 0.0, 0.0])
    }

    /// Converts the affine part of the transform to a kurbo affine matrix.
    pub fn to_kurbo(&self) -> kurbo::Affine {
        kurbo::Affine::new(
            [self.sx, self.shy, self.shx, self.sy, self.tx, self.ty].map(|x| x as f64),
        )
    }
}

impl Mul for Transform {
    type Output = Self;

    /// Composes two transforms so that `(a * b).apply(p) == a.apply(b.apply(p))`.
    ///
    /// A product whose `w2` is zero is returned unnormalized.
    #[inline]
    fn mul(self, other: Self) -> Self {
        let m = mul_3x3(&self.to_3x3(), &other.to_3x3());
        Self::from_3x3(m).unwrap_or_else(|| {
            Self::new([
                m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1],
            ])
        })
    }
}

pub fn mul_3x3(a: &[[f32; 3]; 3], b: &[[f32; 3]; 3]) -> [[f32; 3]; 3] {
    let mut m = [[0.0; 3]; 3];
    for (i, row) in m.iter_mut().enumerate() {
        for (j, value) in row.iter_mut().enumerate() {
            *value = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
    m
}

/// Packs two floats as binary16 into one dword, `lo` in the low half.
pub fn pack_f16x2(lo: f32, hi: f32) -> u32 {
    f16::from_f32(lo).to_bits() as u32 | (f16::from_f32(hi).to_bits() as u32) << 16
}

pub fn unpack_f16x2(dword: u32) -> [f32; 2] {
    [
        f16::from_bits(dword as u16).to_f32(),
        f16::from_bits((dword >> 16) as u16).to_f32(),
    ]
}

#[cfg(test)]
mod tests {
    use super::{pack_f16x2, unpack_f16x2, Transform, TransformType};
    use peniko::kurbo::{Affine, Point};

    #[test]
    fn mul_matches_kurbo() {
        let a = Affine::rotate(0.5).then_translate((3.0, -2.0).into());
        let b = Affine::scale_non_uniform(2.0, 0.5);
        let product = Transform::from_kurbo(&a) * Transform::from_kurbo(&b);
        let expected = a * b;
        let p = Point::new(1.5, 4.0);
        let got = product.apply([p.x as f32, p.y as f32]).unwrap();
        let want = expected * p;
        assert!((got[0] as f64 - want.x).abs() < 1e-4);
        assert!((got[1] as f64 - want.y).abs() < 1e-4);
        let back = product.to_kurbo().as_coeffs();
        for (x, y) in back.iter().zip(expected.as_coeffs()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn projective_apply() {
        let t = Transform::new([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.5, 0.0]);
        assert_eq!(t.classify(), TransformType::Projective);
        assert_eq!(t.apply([2.0, 4.0]), Some([1.0, 2.0]));
        assert_eq!(t.apply([-2.0, 0.0]), None);
    }

    #[test]
    fn normalize_by_w2() {
        let t = Transform::from_3x3([[2.0, 0.0, 4.0], [0.0, 2.0, 6.0], [0.0, 0.0, 2.0]]).unwrap();
        assert_eq!(t, Transform::new([1.0, 0.0, 2.0, 0.0, 1.0, 3.0, 0.0, 0.0]));
        assert!(Transform::from_3x3([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]]).is_none());
    }

    #[test]
    fn classify_invalid() {
        let t = Transform::new([f32::NAN, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(t.classify(), TransformType::Invalid);
        assert!(Transform::IDENTITY.is_affine());
    }

    #[test]
    fn f16x2_edges() {
        assert_eq!(pack_f16x2(1.0, f32::INFINITY), 0x7C00_3C00);
        assert!(unpack_f16x2(pack_f16x2(f32::NAN, 0.0))[0].is_nan());
        for value in [0.0, 0.25, -3.5, 1024.0] {
            assert_eq!(unpack_f16x2(pack_f16x2(value, -value)), [value, -value]);
        }
    }

    #[test]
    fn f16x2_packing() {
        let packed = pack_f16x2(0.5, 1.0);
        assert_eq!(packed & 0xffff, 0x3800);
        assert_eq!(packed >> 16, 0x3C00);
        assert_eq!(unpack_f16x2(packed), [0.5, 1.0]);
    }
}
