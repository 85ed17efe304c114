//! Ordered lists as native array objects.

use crate::error::MarshalError;
use crate::flags::MarshalFlags;
use crate::handle::NativeHandle;
use crate::marshal::{FromNative, MarshalContext, PointerMarshaler, consume_retain, element_flags};
use crate::value::NativeValue;

const ARRAY_CLASS: &str = "NSMutableArray";

#[cfg_attr(feature = "profiling", profiling::function)]
fn read_elements<T: PointerMarshaler>(
    cx: &MarshalContext<'_>,
    array: NativeHandle,
    flags: MarshalFlags,
) -> Result<Vec<T>, MarshalError> {
    let count = usize::from_native(cx, cx.send(array, "count", &[])?, MarshalFlags::empty())?;
    let flags = element_flags(flags);
    let mut out = Vec::with_capacity(count);
    for index in 0..count {
        let element = cx
            .send(array, "objectAtIndex:", &[NativeValue::USize(index)])
            .map_err(|err| MarshalError::from(err).at_index(index))?
            .as_handle()
            .unwrap_or(NativeHandle::NULL);
        match T::to_managed(cx, element, flags) {
            Ok(Some(value)) => out.push(value),
            Ok(None) => {
                return Err(MarshalError::UnexpectedNull {
                    type_name: T::type_name(),
                }
                .at_index(index));
            }
            Err(err) => return Err(err.at_index(index)),
        }
    }
    Ok(out)
}

/// A `Vec` crosses as an array of its elements, in order.
///
/// Conversion is all-or-nothing: if any element fails, the error names its
/// index and every element converted so far is dropped.
impl<T: PointerMarshaler> PointerMarshaler for Vec<T> {
    fn type_name() -> &'static str {
        "NSArray"
    }

    fn from_handle(
        cx: &MarshalContext<'_>,
        handle: NativeHandle,
        flags: MarshalFlags,
    ) -> Result<Self, MarshalError> {
        let result = read_elements(cx, handle, flags);
        consume_retain(cx, handle, flags);
        result
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    fn to_handle(
        &self,
        cx: &MarshalContext<'_>,
        flags: MarshalFlags,
    ) -> Result<NativeHandle, MarshalError> {
        let class = cx.class(ARRAY_CLASS)?;
        let array = cx
            .send(class, "array", &[])?
            .as_handle()
            .filter(|h| !h.is_null())
            .ok_or(MarshalError::UnexpectedNull {
                type_name: ARRAY_CLASS,
            })?;
        for (index, element) in self.iter().enumerate() {
            let handle = element
                .to_handle(cx, MarshalFlags::empty())
                .map_err(|err| err.at_index(index))?;
            cx.send(array, "addObject:", &[NativeValue::Pointer(handle)])
                .map_err(|err| MarshalError::from(err).at_index(index))?;
        }
        if flags.contains(MarshalFlags::TRANSFER_OWNERSHIP) {
            cx.runtime().retain(array);
        }
        Ok(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::test_support::{NO_GLOBALS, runtime};

    crate::object_type!(struct Obj: "NSObject");
    crate::object_type!(struct Text: "NSString");

    #[test]
    fn strings_keep_their_order() {
        let (inner, rt) = runtime();
        let cx = MarshalContext::new(&rt, &NO_GLOBALS);
        let list = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let array = list.to_handle(&cx, MarshalFlags::empty()).unwrap();
        let elements = inner.array_elements(array).unwrap();
        let texts: Vec<_> = elements
            .iter()
            .map(|h| inner.string_value(*h).unwrap())
            .collect();
        assert_eq!(texts, ["a", "b", "c"]);

        let back = Vec::<String>::from_handle(&cx, array, MarshalFlags::empty()).unwrap();
        assert_eq!(back, list);

        inner.drain_autorelease_pool();
        assert_eq!(inner.live_objects(), 0);
    }

    #[test]
    fn empty_list() {
        let (inner, rt) = runtime();
        let cx = MarshalContext::new(&rt, &NO_GLOBALS);
        let empty: Vec<String> = Vec::new();
        let array = empty.to_handle(&cx, MarshalFlags::empty()).unwrap();
        assert_eq!(inner.array_elements(array).unwrap().len(), 0);
        let back = Vec::<String>::from_handle(&cx, array, MarshalFlags::empty()).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn failing_element_rejects_the_whole_list() {
        let (inner, rt) = runtime();
        let cx = MarshalContext::new(&rt, &NO_GLOBALS);
        let class = cx.class("NSObject").unwrap();
        let plain = cx.send(class, "new", &[]).unwrap().as_handle().unwrap();
        let text = "t".to_string();
        let text = text.to_handle(&cx, MarshalFlags::empty()).unwrap();

        let array_class = cx.class(ARRAY_CLASS).unwrap();
        let array = cx.send(array_class, "array", &[]).unwrap();
        let array = array.as_handle().unwrap();
        for element in [text, plain] {
            cx.send(array, "addObject:", &[NativeValue::Pointer(element)])
                .unwrap();
        }

        let err = Vec::<Text>::from_handle(&cx, array, MarshalFlags::empty()).unwrap_err();
        match err {
            MarshalError::Element { index, source } => {
                assert_eq!(index, 1);
                assert!(matches!(*source, MarshalError::WrongClass { .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
        // The element converted before the failure gave its retain back
        assert_eq!(inner.retain_count(text), Some(2));

        let objects = Vec::<Obj>::from_handle(&cx, array, MarshalFlags::empty()).unwrap();
        assert_eq!(objects.len(), 2);
        drop(objects);

        rt.release(plain);
        inner.drain_autorelease_pool();
        assert_eq!(inner.live_objects(), 0);
        assert_eq!(inner.stats().invalid_releases, 0);
    }

    #[test]
    fn retained_array_is_released() {
        let (inner, rt) = runtime();
        let cx = MarshalContext::new(&rt, &NO_GLOBALS);
        let list = vec!["x".to_string()];
        let transfer = MarshalFlags::TRANSFER_OWNERSHIP;
        let array = list.to_handle(&cx, transfer).unwrap();
        assert_eq!(inner.retain_count(array), Some(2));
        let back = Vec::<String>::from_handle(&cx, array, MarshalFlags::RETAINED).unwrap();
        assert_eq!(back, list);
        assert_eq!(inner.retain_count(array), Some(1));
        inner.drain_autorelease_pool();
        assert_eq!(inner.live_objects(), 0);
    }
}
