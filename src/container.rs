//! Values that can be written inside object parts.
//!
//! [`Persist`] is implemented for every [`Primitive`](crate::Primitive), `bool`, object handles
//! and the standard containers. Containers are written as an element count
//! followed by their elements; ordered containers keep their iteration order,
//! hash containers are written in sorted order so identical contents always
//! produce identical bytes.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::Hash;

use crate::error::{PersistError, Result};
use crate::handle::Handle;
use crate::istream::InputStream;
use crate::ostream::OutputStream;
use crate::primitive::Complex;

/// A value with a stream representation.
pub trait Persist {
    /// Writes the value.
    fn put(&self, out: &mut OutputStream<'_>) -> Result<()>;

    /// Reads a value written by [`Persist::put`].
    fn get(input: &mut InputStream<'_>) -> Result<Self>
    where
        Self: Sized;
}

macro_rules! impl_persist_primitive {
    ($($t:ty),* $(,)?) => {
        $(
            impl Persist for $t {
                #[inline]
                fn put(&self, out: &mut OutputStream<'_>) -> Result<()> {
                    out.write_primitive(self)
                }

                #[inline]
                fn get(input: &mut InputStream<'_>) -> Result<Self> {
                    input.read_primitive()
                }
            }
        )*
    };
}

impl_persist_primitive!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, char, String, Complex
);

impl Persist for bool {
    fn put(&self, out: &mut OutputStream<'_>) -> Result<()> {
        out.write_bool(*self)
    }

    fn get(input: &mut InputStream<'_>) -> Result<Self> {
        input.read_bool()
    }
}

/// A non-null object reference.
impl Persist for Handle {
    fn put(&self, out: &mut OutputStream<'_>) -> Result<()> {
        out.write_object(Some(self))
    }

    fn get(input: &mut InputStream<'_>) -> Result<Self> {
        let offset = input.offset();
        input
            .read_object()?
            .ok_or_else(|| PersistError::read_failure(offset, "unexpected null reference"))
    }
}

/// A nullable object reference.
impl Persist for Option<Handle> {
    fn put(&self, out: &mut OutputStream<'_>) -> Result<()> {
        out.write_object(self.as_ref())
    }

    fn get(input: &mut InputStream<'_>) -> Result<Self> {
        input.read_object()
    }
}

impl<A: Persist, B: Persist> Persist for (A, B) {
    fn put(&self, out: &mut OutputStream<'_>) -> Result<()> {
        self.0.put(out)?;
        self.1.put(out)
    }

    fn get(input: &mut InputStream<'_>) -> Result<Self> {
        let a = A::get(input)?;
        let b = B::get(input)?;
        Ok((a, b))
    }
}

impl<T: Persist> Persist for Vec<T> {
    fn put(&self, out: &mut OutputStream<'_>) -> Result<()> {
        out.put_container(self)
    }

    fn get(input: &mut InputStream<'_>) -> Result<Self> {
        input.get_container()
    }
}

impl<T: Persist> Persist for VecDeque<T> {
    fn put(&self, out: &mut OutputStream<'_>) -> Result<()> {
        out.put_container(self)
    }

    fn get(input: &mut InputStream<'_>) -> Result<Self> {
        input.get_container()
    }
}

impl<T: Persist + Ord> Persist for BTreeSet<T> {
    fn put(&self, out: &mut OutputStream<'_>) -> Result<()> {
        out.put_container(self)
    }

    fn get(input: &mut InputStream<'_>) -> Result<Self> {
        input.get_container()
    }
}

impl<T: Persist + Ord + Hash> Persist for HashSet<T> {
    fn put(&self, out: &mut OutputStream<'_>) -> Result<()> {
        let mut items: Vec<&T> = self.iter().collect();
        items.sort_unstable();
        out.put_container(items)
    }

    fn get(input: &mut InputStream<'_>) -> Result<Self> {
        input.get_container()
    }
}

fn put_entries<'x, K, V, I>(out: &mut OutputStream<'_>, entries: I) -> Result<()>
where
    K: Persist + 'x,
    V: Persist + 'x,
    I: ExactSizeIterator<Item = (&'x K, &'x V)>,
{
    out.write_primitive(&(entries.len() as u64))?;
    for (key, value) in entries {
        key.put(out)?;
        value.put(out)?;
    }
    Ok(())
}

impl<K: Persist + Ord, V: Persist> Persist for BTreeMap<K, V> {
    fn put(&self, out: &mut OutputStream<'_>) -> Result<()> {
        put_entries(out, self.iter())
    }

    fn get(input: &mut InputStream<'_>) -> Result<Self> {
        input.get_container::<_, (K, V)>()
    }
}

impl<K: Persist + Ord + Hash, V: Persist> Persist for HashMap<K, V> {
    fn put(&self, out: &mut OutputStream<'_>) -> Result<()> {
        let mut entries: Vec<(&K, &V)> = self.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        put_entries(out, entries.into_iter())
    }

    fn get(input: &mut InputStream<'_>) -> Result<Self> {
        input.get_container::<_, (K, V)>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Registry;

    fn round_trip<T: Persist>(value: &T) -> (Vec<u8>, T) {
        let registry = Registry::builder().build().expect("registry");
        let mut bytes = Vec::new();
        let mut out = OutputStream::new(&registry, &mut bytes);
        out.put(value).expect("put");
        out.close().expect("close");
        let mut input = InputStream::new(&registry, bytes.as_slice()).expect("open");
        let back = input.get::<T>().expect("get");
        assert!(input.at_end().expect("at end"));
        drop(input);
        (bytes, back)
    }

    #[test]
    fn sequences_keep_order() {
        let v = vec![3i64, -1, 2];
        let (bytes, back) = round_trip(&v);
        assert_eq!(back, v);
        assert_eq!(bytes, b"PST\n1\n3\n3\n-1\n2\n".to_vec());

        let d: VecDeque<String> = ["x|y".to_owned(), String::new()].into();
        assert_eq!(round_trip(&d).1, d);
    }

    #[test]
    fn hash_containers_are_written_sorted() {
        let mut map = HashMap::new();
        for k in [9u32, 1, 5, 3] {
            map.insert(k, k % 2 == 0);
        }
        let (bytes, back) = round_trip(&map);
        assert_eq!(back, map);
        assert_eq!(bytes, b"PST\n1\n4\n1\n?3\n?5\n?9\n?".to_vec());

        let set: HashSet<char> = "persist".chars().collect();
        let (bytes_a, back) = round_trip(&set);
        assert_eq!(back, set);
        let (bytes_b, _) = round_trip(&set.iter().copied().collect::<HashSet<char>>());
        assert_eq!(bytes_a, bytes_b);
    }

    #[test]
    fn nested_containers() {
        let mut value: BTreeMap<String, Vec<(u8, Complex)>> = BTreeMap::new();
        value.insert("a".into(), vec![(1, Complex::new(0.5, -1.0))]);
        value.insert("b".into(), Vec::new());
        assert_eq!(round_trip(&value).1, value);

        let set: BTreeSet<i16> = [4, -4, 0].into();
        assert_eq!(round_trip(&set).1, set);
    }

    #[test]
    fn null_handles() {
        let none: Option<Handle> = None;
        let (bytes, back) = round_trip(&none);
        assert!(back.is_none());
        assert_eq!(bytes, b"PST\n1\n~".to_vec());
    }

    #[test]
    fn truncated_container_fails() {
        let registry = Registry::builder().build().expect("registry");
        let mut input = InputStream::new(&registry, &b"PST\n1\n3\n1\n2\n"[..]).expect("open");
        assert!(input.get::<Vec<u8>>().is_err());
        assert!(!input.good());
    }
}
