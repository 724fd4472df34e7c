//! Descriptor aggregation: element-wise mean over one collection window.

use crate::types::Descriptor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("no descriptors collected during the window")]
    Empty,
}

/// Average a window's descriptors into one representative descriptor.
///
/// The expected length is taken from the first input; inputs of any other
/// length are skipped with a warning. Fails with [`AggregateError::Empty`]
/// when nothing usable was collected; callers treat that as "no face
/// detected". The mean is order-independent.
pub fn average(descriptors: &[Descriptor]) -> Result<Descriptor, AggregateError> {
    let Some(first) = descriptors.first() else {
        return Err(AggregateError::Empty);
    };
    let len = first.len();

    let mut sums = vec![0.0f32; len];
    let mut count = 0usize;

    for descriptor in descriptors {
        if descriptor.len() != len {
            tracing::warn!(
                expected = len,
                actual = descriptor.len(),
                "skipping length-mismatched descriptor in window"
            );
            continue;
        }
        for (sum, value) in sums.iter_mut().zip(descriptor.values()) {
            *sum += value;
        }
        count += 1;
    }

    if count == 0 {
        return Err(AggregateError::Empty);
    }

    let inv = 1.0 / count as f32;
    Ok(Descriptor::new(sums.into_iter().map(|s| s * inv).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_two() {
        let a = Descriptor::new(vec![1.0, 2.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        let avg = average(&[a, b]).unwrap();
        assert_eq!(avg.values(), &[2.0, 3.0]);
    }

    #[test]
    fn mean_is_order_independent() {
        let a = Descriptor::new(vec![1.0, 2.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        let forward = average(&[a.clone(), b.clone()]).unwrap();
        let reversed = average(&[b, a]).unwrap();
        assert_eq!(forward, reversed);
    }

    #[test]
    fn single_input_is_identity() {
        let a = Descriptor::new(vec![0.5, -0.5, 1.5]);
        assert_eq!(average(std::slice::from_ref(&a)).unwrap(), a);
    }

    #[test]
    fn empty_input_fails() {
        assert!(matches!(average(&[]), Err(AggregateError::Empty)));
    }

    #[test]
    fn mismatched_lengths_are_skipped() {
        let a = Descriptor::new(vec![1.0, 3.0]);
        let short = Descriptor::new(vec![100.0]);
        let b = Descriptor::new(vec![3.0, 5.0]);
        let avg = average(&[a, short, b]).unwrap();
        assert_eq!(avg.values(), &[2.0, 4.0]);
    }
}
