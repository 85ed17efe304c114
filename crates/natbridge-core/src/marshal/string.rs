//! Text as native string objects.

use std::ffi::{CStr, CString, c_char};

use crate::abi::NativeType;
use crate::error::MarshalError;
use crate::flags::MarshalFlags;
use crate::handle::NativeHandle;
use crate::marshal::{MarshalContext, NativeTyped, PointerMarshaler, ToNative, consume_retain};
use crate::value::NativeValue;

const STRING_CLASS: &str = "NSString";

/// Create an autoreleased string object. With `TRANSFER_OWNERSHIP` the
/// handle also carries a +1 for the callee.
pub(crate) fn string_to_handle(
    cx: &MarshalContext<'_>,
    text: &str,
    flags: MarshalFlags,
) -> Result<NativeHandle, MarshalError> {
    let contents = CString::new(text)
        .map_err(|err| MarshalError::InvalidString(err.to_string()))?;
    let class = cx.class(STRING_CLASS)?;
    let handle = cx
        .send(
            class,
            "stringWithUTF8String:",
            &[NativeValue::Pointer(NativeHandle::from_ptr(contents.as_ptr()))],
        )?
        .as_handle()
        .filter(|h| !h.is_null())
        .ok_or(MarshalError::UnexpectedNull {
            type_name: STRING_CLASS,
        })?;
    if flags.contains(MarshalFlags::TRANSFER_OWNERSHIP) {
        cx.runtime().retain(handle);
    }
    Ok(handle)
}

fn read_string(cx: &MarshalContext<'_>, handle: NativeHandle) -> Result<String, MarshalError> {
    let bytes = cx
        .send(handle, "UTF8String", &[])?
        .as_handle()
        .filter(|p| !p.is_null())
        .ok_or_else(|| MarshalError::InvalidString(format!("{} has no UTF-8 contents", handle)))?;
    // SAFETY: `UTF8String` returns a NUL-terminated buffer owned by the
    // string object, which is alive for the duration of this call.
    let text = unsafe { CStr::from_ptr(bytes.as_ptr::<c_char>()) };
    text.to_str()
        .map(str::to_owned)
        .map_err(|err| MarshalError::InvalidString(err.to_string()))
}

impl PointerMarshaler for String {
    fn type_name() -> &'static str {
        STRING_CLASS
    }

    fn from_handle(
        cx: &MarshalContext<'_>,
        handle: NativeHandle,
        flags: MarshalFlags,
    ) -> Result<Self, MarshalError> {
        let result = read_string(cx, handle);
        consume_retain(cx, handle, flags);
        result
    }

    fn to_handle(
        &self,
        cx: &MarshalContext<'_>,
        flags: MarshalFlags,
    ) -> Result<NativeHandle, MarshalError> {
        string_to_handle(cx, self, flags)
    }
}

impl NativeTyped for str {
    fn native_type() -> NativeType {
        NativeType::Object
    }
}

impl ToNative for str {
    fn to_native(
        &self,
        cx: &MarshalContext<'_>,
        flags: MarshalFlags,
    ) -> Result<NativeValue, MarshalError> {
        string_to_handle(cx, self, flags).map(NativeValue::Pointer)
    }
}
