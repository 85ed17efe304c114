//! The call dispatcher.
//!
//! Every call made through a binding follows the same path:
//!
//! 1. The managed type's [`ClassBinding`] is resolved (once per type).
//! 2. The entry point is looked up by name and checked against the
//!    argument and return types of the call.
//! 3. Arguments are marshaled. A failing argument aborts the call before
//!    anything native runs.
//! 4. The call is made: a message send resolved by selector on the
//!    receiver's runtime class, or a direct call of a resolved C function.
//! 5. The result is marshaled back with the ownership the entry point
//!    returns by Cocoa naming convention or by declaration.
//!
//! Message sends are dynamic: the same declared method dispatches to
//! whatever implementation the receiver's class provides, found by walking
//! its superclass chain. Resolved implementations are cached per (class,
//! selector).

use natbridge_core::{
    BridgeError, BridgeResult, FromNative, MarshalError, MarshalFlags, MethodFamily, MethodImp,
    NativeArgs, NativeCallError, NativeHandle, NativeRuntime, NativeType, NativeTyped, NativeValue,
    ObjectType, PointerMarshaler, Selector, TargetAbi, ToNative,
};
use natbridge_registry::{Bound, BoundEntry, ClassBinding, EntryKind};

use crate::bridge::Bridge;

/// Which side of the binding a call targets.
#[derive(Clone, Copy)]
enum Target {
    Instance(NativeHandle),
    Class,
}

impl Bridge {
    /// Call the instance entry point `entry` of `T` on `target`.
    ///
    /// Instance entries are methods, properties, adapter methods and
    /// instance functions. A declared but unimplemented adapter method fails
    /// with [`BridgeError::NotImplemented`] without any native call.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn invoke<T, A, R>(&self, target: &T, entry: &str, args: A) -> BridgeResult<R>
    where
        T: Bound + ObjectType,
        A: NativeArgs,
        R: FromNative,
    {
        let binding = self.bind::<T>()?;
        self.dispatch(&binding, Target::Instance(target.handle()), entry, args)
    }

    /// Call the class-side entry point `entry` of `T`: a class method, a
    /// static function or a global value.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn invoke_class<T, A, R>(&self, entry: &str, args: A) -> BridgeResult<R>
    where
        T: Bound,
        A: NativeArgs,
        R: FromNative,
    {
        let binding = self.bind::<T>()?;
        self.dispatch(&binding, Target::Class, entry, args)
    }

    /// Read the property `entry` of `target`.
    pub fn get_property<T, V>(&self, target: &T, entry: &str) -> BridgeResult<V>
    where
        T: Bound + ObjectType,
        V: FromNative,
    {
        let binding = self.bind::<T>()?;
        expect_kind(
            &binding,
            entry,
            |k| matches!(k, EntryKind::Getter { .. }),
            "a getter",
        )?;
        self.dispatch(&binding, Target::Instance(target.handle()), entry, ())
    }

    /// Write the property `entry` of `target`.
    pub fn set_property<T, V>(&self, target: &T, entry: &str, value: &V) -> BridgeResult<()>
    where
        T: Bound + ObjectType,
        V: ToNative + ?Sized,
    {
        let binding = self.bind::<T>()?;
        expect_kind(
            &binding,
            entry,
            |k| matches!(k, EntryKind::Setter { .. }),
            "a setter",
        )?;
        self.dispatch(&binding, Target::Instance(target.handle()), entry, (value,))
    }

    /// Read the global value `entry` declared by `T`.
    pub fn binding_global<T, V>(&self, entry: &str) -> BridgeResult<V>
    where
        T: Bound,
        V: FromNative,
    {
        let binding = self.bind::<T>()?;
        expect_kind(
            &binding,
            entry,
            |k| matches!(k, EntryKind::Global { .. }),
            "a global",
        )?;
        self.dispatch(&binding, Target::Class, entry, ())
    }

    /// Create a new `T`: `alloc` on the bound class, then the initializer
    /// entry `init_entry`.
    ///
    /// The initializer consumes the +1 from `alloc` and returns an owned
    /// object, which the returned value adopts. If the arguments do not
    /// marshal or the initializer fails, the allocated object is released.
    /// An initializer returning nil has already disposed of its receiver.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn construct<T, A>(&self, init_entry: &str, args: A) -> BridgeResult<T>
    where
        T: Bound + ObjectType,
        A: NativeArgs,
    {
        let binding = self.bind::<T>()?;
        let entry = binding.require(init_entry)?;
        let selector = match entry.kind() {
            EntryKind::Method { selector } if selector.family() == MethodFamily::Init => selector,
            _ => {
                return Err(BridgeError::signature_mismatch(
                    binding.managed_type(),
                    init_entry,
                    "not an initializer",
                ));
            }
        };
        check_signature::<A, T>(&binding, entry)?;

        let class = binding.native();
        let allocated = self
            .send_message(class, &Selector::new("alloc"), &[])?
            .as_handle()
            .and_then(NativeHandle::non_null)
            .ok_or_else(|| NativeCallError::InitFailed {
                class: binding.kind().native_name().to_string(),
                selector: "alloc".to_string(),
            })?;

        let cx = self.context();
        let result = args
            .to_values(&cx)
            .map_err(BridgeError::from)
            .and_then(|values| self.send_message(allocated, selector, &values));
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                self.runtime().release(allocated);
                return Err(err);
            }
        };

        match value.as_handle() {
            Some(handle) if !handle.is_null() => {
                log::trace!("constructed {} with {}", binding.managed_type(), selector);
                Ok(T::from_native(&cx, NativeValue::Pointer(handle), MarshalFlags::RETAINED)?)
            }
            _ => Err(NativeCallError::InitFailed {
                class: binding.kind().native_name().to_string(),
                selector: selector.name().to_string(),
            }
            .into()),
        }
    }

    /// Wrap an existing native handle without running any initializer.
    ///
    /// The zero handle yields `None`. `flags` say whether the handle is +1
    /// or only observed.
    pub fn wrap<T: ObjectType>(
        &self,
        handle: NativeHandle,
        flags: MarshalFlags,
    ) -> BridgeResult<Option<T>> {
        Ok(T::to_managed(&self.context(), handle, flags)?)
    }

    /// Dynamic message send through the method cache.
    pub fn send_message(
        &self,
        receiver: NativeHandle,
        selector: &Selector,
        args: &[NativeValue],
    ) -> BridgeResult<NativeValue> {
        if receiver.is_null() || !self.config().cache_method_lookups() {
            return Ok(self.runtime().send(receiver, selector, args)?);
        }
        let imp = self.method_imp(receiver, selector)?;
        Ok(self.runtime().call_method(imp, receiver, selector, args)?)
    }

    fn method_imp(
        &self,
        receiver: NativeHandle,
        selector: &Selector,
    ) -> Result<MethodImp, NativeCallError> {
        let runtime = self.runtime();
        let class = runtime
            .class_of(receiver)
            .ok_or(NativeCallError::InvalidReceiver(receiver))?;
        let key = (class, selector.hash_value());
        let cached = {
            let imps = self.imps.read().unwrap_or_else(|p| p.into_inner());
            imps.get(&key).copied()
        };
        if let Some(imp) = cached {
            return Ok(imp);
        }

        let imp = runtime
            .resolve_method(class, selector)
            .ok_or_else(|| NativeCallError::UnrecognizedSelector {
                class: runtime.class_name(class).unwrap_or_else(|| class.to_string()),
                selector: selector.name().to_string(),
                receiver,
            })?;
        log::debug!("cached {} for class {}", selector, class);
        self.imps
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key, imp);
        Ok(imp)
    }

    fn dispatch<A, R>(
        &self,
        binding: &ClassBinding,
        target: Target,
        entry: &str,
        args: A,
    ) -> BridgeResult<R>
    where
        A: NativeArgs,
        R: FromNative,
    {
        let bound = binding.require(entry)?;
        if let EntryKind::NotImplemented { .. } = bound.kind() {
            return Err(BridgeError::not_implemented(binding.managed_type(), entry));
        }
        check_signature::<A, R>(binding, bound)?;
        let cx = self.context();

        let result = match (bound.kind(), target) {
            (
                EntryKind::Method { selector }
                | EntryKind::Getter { selector }
                | EntryKind::Setter { selector }
                | EntryKind::Implemented { selector, .. },
                Target::Instance(receiver),
            ) => {
                let values = args.to_values(&cx)?;
                log::trace!("[{} {}]", receiver, selector);
                self.send_message(receiver, selector, &values)?
            }
            (EntryKind::ClassMethod { selector }, Target::Class) => {
                let values = args.to_values(&cx)?;
                log::trace!("[{} {}]", binding.kind().native_name(), selector);
                self.send_message(binding.native(), selector, &values)?
            }
            (EntryKind::Function { instance, .. }, target) => {
                let mut values = Vec::with_capacity(bound.signature().args.len() + 1);
                match (*instance, target) {
                    (true, Target::Instance(receiver)) => {
                        values.push(NativeValue::Pointer(receiver))
                    }
                    (false, Target::Class) => {}
                    _ => return Err(wrong_side(binding, entry, *instance)),
                }
                values.extend(args.to_values(&cx)?);
                let address = self.function_address(binding, bound)?;
                log::trace!("calling {} at {}", entry, address);
                self.runtime().call_function(address, &values)?
            }
            (EntryKind::Global { symbol }, Target::Class) => {
                // Optional globals are pointer-typed, so absence reads as null
                let word = self.globals().value(symbol)?.unwrap_or(NativeHandle::NULL);
                word_value(word, &bound.signature().ret, &self.runtime().abi())?
            }
            (_, Target::Class) => return Err(wrong_side(binding, entry, true)),
            (_, Target::Instance(_)) => return Err(wrong_side(binding, entry, false)),
        };

        let flags = MarshalFlags::for_return(bound.returns_retained());
        Ok(R::from_native(&cx, result, flags)?)
    }

    /// Address of a function entry: resolved at bind time for required
    /// functions, on first call for optional ones.
    fn function_address(
        &self,
        binding: &ClassBinding,
        entry: &BoundEntry,
    ) -> BridgeResult<NativeHandle> {
        if let Some(address) = entry.address() {
            return Ok(address);
        }
        let EntryKind::Function { symbol, .. } = entry.kind() else {
            return Err(BridgeError::signature_mismatch(
                binding.managed_type(),
                entry.name(),
                "not a function",
            ));
        };
        self.symbols()
            .resolve_in(binding.library(), symbol, true)?
            .ok_or_else(|| BridgeError::symbol_not_found(*symbol, binding.library()))
    }
}

fn expect_kind(
    binding: &ClassBinding,
    entry: &str,
    accept: impl Fn(&EntryKind) -> bool,
    expected: &str,
) -> BridgeResult<()> {
    if accept(binding.require(entry)?.kind()) {
        Ok(())
    } else {
        Err(BridgeError::signature_mismatch(
            binding.managed_type(),
            entry,
            format!("is not {}", expected),
        ))
    }
}

fn wrong_side(binding: &ClassBinding, entry: &str, instance: bool) -> BridgeError {
    let detail = if instance {
        "is an instance entry point and needs a receiver"
    } else {
        "is a class entry point and takes no receiver"
    };
    BridgeError::signature_mismatch(binding.managed_type(), entry, detail)
}

/// The call's argument types must match the declaration exactly. The
/// return type must match too, except that a call may discard any result.
fn check_signature<A: NativeArgs, R: NativeTyped>(
    binding: &ClassBinding,
    entry: &BoundEntry,
) -> BridgeResult<()> {
    let declared = entry.signature();
    let args = A::arg_types();
    if args != declared.args {
        return Err(BridgeError::signature_mismatch(
            binding.managed_type(),
            entry.name(),
            format!(
                "declared arguments {:?}, called with {:?}",
                declared.args, args
            ),
        ));
    }
    let ret = R::native_type();
    let both_pointers = ret.is_pointer_like() && declared.ret.is_pointer_like();
    if ret != declared.ret && ret != NativeType::Void && !both_pointers {
        return Err(BridgeError::signature_mismatch(
            binding.managed_type(),
            entry.name(),
            format!("declared to return {}, read as {}", declared.ret, ret),
        ));
    }
    Ok(())
}

/// Interpret the word stored at a global symbol as a value of `ty`.
fn word_value(
    word: NativeHandle,
    ty: &NativeType,
    abi: &TargetAbi,
) -> Result<NativeValue, MarshalError> {
    let bits = word.address();
    let value = match ty {
        ty if ty.is_pointer_like() => NativeValue::Pointer(word),
        NativeType::Bool => NativeValue::Bool(bits & 0xff != 0),
        NativeType::I8 => NativeValue::I8(bits as i8),
        NativeType::U8 => NativeValue::U8(bits as u8),
        NativeType::I16 => NativeValue::I16(bits as i16),
        NativeType::U16 => NativeValue::U16(bits as u16),
        NativeType::I32 => NativeValue::I32(bits as i32),
        NativeType::U32 => NativeValue::U32(bits as u32),
        NativeType::I64 => NativeValue::I64(bits as i64),
        NativeType::U64 => NativeValue::U64(bits as u64),
        NativeType::MachineSInt if abi.pointer_width == 4 => {
            NativeValue::ISize(bits as i32 as isize)
        }
        NativeType::MachineSInt => NativeValue::ISize(bits as isize),
        NativeType::MachineUInt if abi.pointer_width == 4 => {
            NativeValue::USize(bits as u32 as usize)
        }
        NativeType::MachineUInt => NativeValue::USize(bits),
        other => {
            let actual = if matches!(other, NativeType::Struct(_)) {
                "struct"
            } else {
                "floating point"
            };
            return Err(MarshalError::TypeMismatch {
                expected: "a word-sized global",
                actual,
            });
        }
    };
    Ok(value)
}
