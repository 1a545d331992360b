pub mod mask;

use num_traits::{Bounded, One};
use std::any::TypeId;

pub fn is_floating_point<T: 'static>() -> bool {
    TypeId::of::<T>() == TypeId::of::<f32>()
}

/// Value of a fully saturated sample: 1.0 for float images, `MAX` otherwise.
pub fn get_max_value<T: Bounded + One + 'static>() -> T {
    if is_floating_point::<T>() {
        T::one()
    } else {
        T::max_value()
    }
}
