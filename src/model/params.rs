//! Named access to learnable tensors for an external optimizer

use ndarray::{ArrayViewD, ArrayViewMutD};

/// A learnable tensor together with its dotted name, e.g. `filter.w1`
pub type NamedParameter<'a> = (String, ArrayViewD<'a, f64>);

/// Mutable counterpart of [`NamedParameter`]
pub type NamedParameterMut<'a> = (String, ArrayViewMutD<'a, f64>);

/// Layers that own learnable tensors.
///
/// Names are stable across calls and nested layers prefix their children's
/// names with their own field name.
pub trait Parameters {
    /// Read-only views of every learnable tensor
    fn named_parameters(&self) -> Vec<NamedParameter<'_>>;

    /// Mutable views of every learnable tensor, in the same order
    fn named_parameters_mut(&mut self) -> Vec<NamedParameterMut<'_>>;

    /// Total number of learnable scalars
    fn num_parameters(&self) -> usize {
        self.named_parameters().iter().map(|(_, p)| p.len()).sum()
    }
}

/// Prefix every name with `prefix.`
pub fn with_prefix<T>(prefix: &str, params: Vec<(String, T)>) -> Vec<(String, T)> {
    params
        .into_iter()
        .map(|(name, p)| (format!("{}.{}", prefix, name), p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    struct Pair {
        weight: Array2<f64>,
        bias: Array1<f64>,
    }

    impl Parameters for Pair {
        fn named_parameters(&self) -> Vec<NamedParameter<'_>> {
            vec![
                ("weight".to_string(), self.weight.view().into_dyn()),
                ("bias".to_string(), self.bias.view().into_dyn()),
            ]
        }

        fn named_parameters_mut(&mut self) -> Vec<NamedParameterMut<'_>> {
            vec![
                ("weight".to_string(), self.weight.view_mut().into_dyn()),
                ("bias".to_string(), self.bias.view_mut().into_dyn()),
            ]
        }
    }

    #[test]
    fn test_prefix_and_count() {
        let mut pair = Pair {
            weight: Array2::zeros((3, 4)),
            bias: Array1::zeros(3),
        };
        assert_eq!(pair.num_parameters(), 15);

        let names: Vec<String> = with_prefix("fc1", pair.named_parameters())
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["fc1.weight", "fc1.bias"]);

        for (_, mut p) in pair.named_parameters_mut() {
            p.fill(1.0);
        }
        assert_eq!(pair.bias.sum(), 3.0);
    }
}
