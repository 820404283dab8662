use std::rc::Rc;

/// Decides whether a new value counts as a change. Returning `true`
/// suppresses propagation.
pub type Comparer<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Structural comparison through [`PartialEq`]. The default policy.
pub fn partial_eq<T: PartialEq + 'static>() -> Comparer<T> {
    Rc::new(|a, b| a == b)
}

/// Treats every write as a change, even when the value is equal to the
/// old one. Use for types without a meaningful equality.
pub fn never<T: 'static>() -> Comparer<T> {
    Rc::new(|_, _| false)
}

/// A custom comparison.
pub fn from_fn<T: 'static>(f: impl Fn(&T, &T) -> bool + 'static) -> Comparer<T> {
    Rc::new(f)
}
