use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Dense row-major matrix with a gradient buffer of the same shape.
///
/// `w` holds values and `dw` holds accumulated gradients; both always have
/// exactly `rows * cols` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    rows: usize,
    cols: usize,
    pub w: Vec<f64>,
    pub dw: Vec<f64>,
}

impl Tensor {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Tensor {
            rows,
            cols,
            w: vec![0.0; rows * cols],
            dw: vec![0.0; rows * cols],
        }
    }

    /// Build a tensor from row-major values. Gradients start at zero.
    pub fn from_vec(rows: usize, cols: usize, values: Vec<f64>) -> Self {
        assert_eq!(
            values.len(),
            rows * cols,
            "tensor data length {} does not match shape {}x{}",
            values.len(),
            rows,
            cols
        );
        Tensor {
            rows,
            cols,
            dw: vec![0.0; values.len()],
            w: values,
        }
    }

    /// Column vector (`n x 1`) holding `values`.
    pub fn column(values: &[f64]) -> Self {
        Self::from_vec(values.len(), 1, values.to_vec())
    }

    /// Tensor filled with Gaussian samples of mean `mu` and deviation `std`.
    pub fn random_normal<R: Rng + ?Sized>(
        rows: usize,
        cols: usize,
        mu: f64,
        std: f64,
        rng: &mut R,
    ) -> Self {
        let mut t = Self::zeros(rows, cols);
        for v in t.w.iter_mut() {
            let z: f64 = rng.sample(StandardNormal);
            *v = mu + std * z;
        }
        t
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.w.len()
    }

    pub fn is_empty(&self) -> bool {
        self.w.is_empty()
    }

    fn index(&self, row: usize, col: usize) -> usize {
        assert!(
            row < self.rows && col < self.cols,
            "index ({}, {}) out of range for {}x{} tensor",
            row,
            col,
            self.rows,
            self.cols
        );
        self.cols * row + col
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.w[self.index(row, col)]
    }

    pub fn set(&mut self, row: usize, col: usize, v: f64) {
        let ix = self.index(row, col);
        self.w[ix] = v;
    }

    /// Overwrite the leading values with `values`.
    pub fn set_from(&mut self, values: &[f64]) {
        assert!(
            values.len() <= self.w.len(),
            "cannot copy {} values into tensor of length {}",
            values.len(),
            self.w.len()
        );
        self.w[..values.len()].copy_from_slice(values);
    }

    /// Write a column vector into column `col`.
    pub fn set_column(&mut self, column: &[f64], col: usize) {
        assert_eq!(column.len(), self.rows, "column length must equal row count");
        for (q, &v) in column.iter().enumerate() {
            let ix = self.index(q, col);
            self.w[ix] = v;
        }
    }

    pub fn fill_grad(&mut self, c: f64) {
        self.dw.iter_mut().for_each(|g| *g = c);
    }

    pub fn zero_grad(&mut self) {
        self.fill_grad(0.0);
    }

    /// Plain matrix product of values, no gradient bookkeeping.
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(
            self.cols, other.rows,
            "matmul dimensions misaligned: {}x{} * {}x{}",
            self.rows, self.cols, other.rows, other.cols
        );
        let (n, k, d) = (self.rows, self.cols, other.cols);
        let mut out = Tensor::zeros(n, d);
        for i in 0..n {
            for j in 0..d {
                let mut dot = 0.0;
                for q in 0..k {
                    dot += self.w[k * i + q] * other.w[d * q + j];
                }
                out.w[d * i + j] = dot;
            }
        }
        out
    }

    /// Copy of the values with a fresh zero gradient.
    pub fn detached(&self) -> Tensor {
        Tensor::from_vec(self.rows, self.cols, self.w.clone())
    }

    pub fn is_finite(&self) -> bool {
        self.w.iter().all(|v| v.is_finite())
    }
}

/// On-disk form of a tensor: shape plus values, gradients are never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorRecord {
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<f64>,
}

impl From<&Tensor> for TensorRecord {
    fn from(t: &Tensor) -> Self {
        TensorRecord {
            rows: t.rows,
            cols: t.cols,
            values: t.w.clone(),
        }
    }
}

impl TryFrom<TensorRecord> for Tensor {
    type Error = String;

    fn try_from(record: TensorRecord) -> Result<Self, Self::Error> {
        if record.values.len() != record.rows * record.cols {
            return Err(format!(
                "tensor record has {} values for shape {}x{}",
                record.values.len(),
                record.rows,
                record.cols
            ));
        }
        Ok(Tensor::from_vec(record.rows, record.cols, record.values))
    }
}

impl Serialize for Tensor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TensorRecord::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Tensor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = TensorRecord::deserialize(deserializer)?;
        Tensor::try_from(record).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_get_after_set() {
        let mut t = Tensor::zeros(3, 4);
        for r in 0..3 {
            for c in 0..4 {
                let v = (r * 10 + c) as f64 - 5.5;
                t.set(r, c, v);
                assert_eq!(t.get(r, c), v);
            }
        }
        assert_eq!(t.w.len(), t.dw.len());
        assert_eq!(t.len(), 12);
    }

    #[test]
    fn test_row_major_layout() {
        let t = Tensor::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(t.get(0, 2), 3.0);
        assert_eq!(t.get(1, 0), 4.0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_get_out_of_range_panics() {
        let t = Tensor::zeros(2, 2);
        t.get(2, 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_col_overflow_does_not_wrap() {
        // (0, 2) would alias (1, 0) with a flat-index check only
        let mut t = Tensor::zeros(2, 2);
        t.set(0, 2, 1.0);
    }

    #[test]
    #[should_panic(expected = "matmul dimensions misaligned")]
    fn test_matmul_mismatch_panics() {
        let a = Tensor::zeros(2, 3);
        let b = Tensor::zeros(2, 3);
        a.matmul(&b);
    }

    #[test]
    fn test_matmul_values() {
        let a = Tensor::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        let b = Tensor::column(&[1.0, -1.0]);
        let out = a.matmul(&b);
        assert_eq!(out.rows(), 2);
        assert_eq!(out.cols(), 1);
        assert_eq!(out.w, vec![-1.0, -1.0]);
    }

    #[test]
    fn test_set_column() {
        let mut t = Tensor::zeros(3, 2);
        t.set_column(&[1.0, 2.0, 3.0], 1);
        assert_eq!(t.w, vec![0.0, 1.0, 0.0, 2.0, 0.0, 3.0]);
    }

    #[test]
    fn test_random_normal_is_seeded() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        let ta = Tensor::random_normal(4, 4, 0.0, 0.1, &mut a);
        let tb = Tensor::random_normal(4, 4, 0.0, 0.1, &mut b);
        assert_eq!(ta, tb);
        assert!(ta.dw.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_serde_drops_gradients() {
        let mut t = Tensor::from_vec(1, 2, vec![0.5, -0.5]);
        t.fill_grad(3.0);
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"rows\":1"));
        let back: Tensor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.w, t.w);
        assert_eq!(back.dw, vec![0.0, 0.0]);
    }

    #[test]
    fn test_deserialize_rejects_bad_shape() {
        let json = r#"{"rows":2,"cols":2,"values":[1.0]}"#;
        assert!(serde_json::from_str::<Tensor>(json).is_err());
    }
}
