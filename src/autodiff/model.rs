use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::tensor::{Tensor, TensorRecord};

/// Ordered mapping from parameter name to tensor.
///
/// Insertion order is part of the model: flattening, gene mapping and
/// serialization all walk parameters in the order they were declared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    params: Vec<(String, Tensor)>,
}

impl Model {
    pub fn new() -> Self {
        Model { params: Vec::new() }
    }

    /// Insert a parameter. Replacing an existing name keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        let name = name.into();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = tensor,
            None => self.params.push((name, tensor)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        self.params
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.params.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Tensor)> {
        self.params.iter_mut().map(|(n, t)| (n.as_str(), t))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Total number of scalars across all parameters.
    pub fn num_parameters(&self) -> usize {
        self.params.iter().map(|(_, t)| t.len()).sum()
    }

    pub fn zero_grads(&mut self) {
        for (_, t) in self.params.iter_mut() {
            t.zero_grad();
        }
    }

    /// All gradients concatenated in declaration order.
    pub fn flatten_grads(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.num_parameters());
        for (_, t) in &self.params {
            out.extend_from_slice(&t.dw);
        }
        out
    }

    /// All values concatenated in declaration order.
    pub fn flatten_values(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.num_parameters());
        for (_, t) in &self.params {
            out.extend_from_slice(&t.w);
        }
        out
    }

    /// Inverse of [`Model::flatten_values`].
    pub fn restore_values(&mut self, values: &[f64]) {
        assert_eq!(
            values.len(),
            self.num_parameters(),
            "flat parameter vector has wrong length"
        );
        let mut offset = 0;
        for (_, t) in self.params.iter_mut() {
            let n = t.len();
            t.w.copy_from_slice(&values[offset..offset + n]);
            offset += n;
        }
    }

    pub fn is_finite(&self) -> bool {
        self.params.iter().all(|(_, t)| t.is_finite())
    }
}

impl Serialize for Model {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.params.len()))?;
        for (name, tensor) in &self.params {
            map.serialize_entry(name, &TensorRecord::from(tensor))?;
        }
        map.end()
    }
}

struct ModelVisitor;

impl<'de> Visitor<'de> for ModelVisitor {
    type Value = Model;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map from parameter name to {rows, cols, values}")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Model, A::Error> {
        let mut model = Model::new();
        while let Some((name, record)) = access.next_entry::<String, TensorRecord>()? {
            let tensor = Tensor::try_from(record).map_err(serde::de::Error::custom)?;
            model.insert(name, tensor);
        }
        Ok(model)
    }
}

impl<'de> Deserialize<'de> for Model {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(ModelVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model() -> Model {
        let mut m = Model::new();
        m.insert("W2", Tensor::from_vec(1, 2, vec![1.0, 2.0]));
        m.insert("b2", Tensor::from_vec(1, 1, vec![3.0]));
        m.insert("W1", Tensor::from_vec(2, 1, vec![4.0, 5.0]));
        m
    }

    #[test]
    fn test_order_is_insertion_order() {
        let m = sample_model();
        let names: Vec<&str> = m.names().collect();
        assert_eq!(names, vec!["W2", "b2", "W1"]);
        assert_eq!(m.flatten_values(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut m = sample_model();
        m.insert("b2", Tensor::from_vec(1, 1, vec![9.0]));
        let names: Vec<&str> = m.names().collect();
        assert_eq!(names, vec!["W2", "b2", "W1"]);
        assert_eq!(m.get("b2").unwrap().w, vec![9.0]);
    }

    #[test]
    fn test_json_preserves_order_and_zeroes_grads() {
        let mut m = sample_model();
        for (_, t) in m.iter_mut() {
            t.fill_grad(1.0);
        }
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.find("\"W2\"").unwrap() < json.find("\"W1\"").unwrap());

        let back: Model = serde_json::from_str(&json).unwrap();
        let names: Vec<&str> = back.names().collect();
        assert_eq!(names, vec!["W2", "b2", "W1"]);
        assert_eq!(back.flatten_values(), m.flatten_values());
        assert!(back.flatten_grads().iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_restore_values_roundtrip() {
        let mut m = sample_model();
        let mut flat = m.flatten_values();
        flat.iter_mut().for_each(|v| *v *= -1.0);
        m.restore_values(&flat);
        assert_eq!(m.get("W1").unwrap().w, vec![-4.0, -5.0]);
    }

    #[test]
    fn test_clone_is_deep() {
        let m = sample_model();
        let mut c = m.clone();
        c.get_mut("W2").unwrap().w[0] = 100.0;
        assert_eq!(m.get("W2").unwrap().w[0], 1.0);
    }
}
