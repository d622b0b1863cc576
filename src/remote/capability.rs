//! Typed capability calls.
//!
//! A capability is a named remote interface. On the controller side a
//! [`RemoteCapability`] type wraps a [`CapabilityStub`]; each of its methods
//! marshals its arguments through [`Arguments`], which yields both the JSON
//! values and the ordered parameter type descriptors that select the
//! remote method.
//!
//! ```rust,ignore
//! struct Echo(CapabilityStub);
//!
//! impl RemoteCapability for Echo {
//!     const NAME: &'static str = "demo.Echo";
//!     fn bind(stub: CapabilityStub) -> Self { Self(stub) }
//! }
//!
//! impl Echo {
//!     async fn echo(&self, text: String) -> Result<String> {
//!         self.0.call("echo", (text,)).await
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::remote::client::ServerHandle;
use crate::wire::message::InvocationRequest;
use crate::{HarnessError, Result};

// ── Type descriptors ──────────────────────────────────────────────────────────

/// A value type that may cross the invocation channel.
///
/// The descriptor is part of the method signature, so two methods with the
/// same name but different parameter types dispatch independently.
pub trait WireType: Serialize + DeserializeOwned {
    /// Stable type descriptor, e.g. `string` or `list<long>`.
    fn descriptor() -> String;
}

macro_rules! wire_type {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl WireType for $ty {
                fn descriptor() -> String {
                    $name.to_owned()
                }
            }
        )*
    };
}

wire_type! {
    String => "string",
    bool => "boolean",
    i32 => "int",
    i64 => "long",
    u32 => "uint",
    u64 => "ulong",
    f64 => "double",
    Value => "any",
}

impl<T: WireType> WireType for Vec<T> {
    fn descriptor() -> String {
        format!("list<{}>", T::descriptor())
    }
}

impl<T: WireType> WireType for Option<T> {
    fn descriptor() -> String {
        format!("optional<{}>", T::descriptor())
    }
}

// ── Argument lists ────────────────────────────────────────────────────────────

/// An ordered argument list: `()` or a tuple of [`WireType`]s.
pub trait Arguments: Sized {
    /// Parameter type descriptors, in declaration order.
    fn descriptors() -> Vec<String>;

    /// Encode the arguments, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Marshal` if an argument cannot be serialized.
    fn into_values(self) -> Result<Vec<Value>>;

    /// Decode arguments received over the channel.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Marshal` on an arity or type mismatch.
    fn from_values(values: Vec<Value>) -> Result<Self>;
}

impl Arguments for () {
    fn descriptors() -> Vec<String> {
        Vec::new()
    }

    fn into_values(self) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }

    fn from_values(values: Vec<Value>) -> Result<Self> {
        expect_arity(&values, 0)
    }
}

macro_rules! tuple_arguments {
    ($len:literal; $($name:ident),+) => {
        impl<$($name: WireType),+> Arguments for ($($name,)+) {
            fn descriptors() -> Vec<String> {
                vec![$($name::descriptor()),+]
            }

            #[allow(non_snake_case)]
            fn into_values(self) -> Result<Vec<Value>> {
                let ($($name,)+) = self;
                Ok(vec![$(serde_json::to_value($name)?),+])
            }

            #[allow(non_snake_case)]
            fn from_values(values: Vec<Value>) -> Result<Self> {
                expect_arity(&values, $len)?;
                let mut values = values.into_iter();
                $(
                    let $name: $name = decode_next(&mut values)?;
                )+
                Ok(($($name,)+))
            }
        }
    };
}

tuple_arguments!(1; A);
tuple_arguments!(2; A, B);
tuple_arguments!(3; A, B, C);
tuple_arguments!(4; A, B, C, D);

fn expect_arity(values: &[Value], expected: usize) -> Result<()> {
    if values.len() == expected {
        Ok(())
    } else {
        Err(HarnessError::Marshal(format!(
            "expected {expected} argument(s), got {}",
            values.len()
        )))
    }
}

fn decode_next<T: WireType>(values: &mut impl Iterator<Item = Value>) -> Result<T> {
    let value = values
        .next()
        .ok_or_else(|| HarnessError::Marshal("argument list exhausted".into()))?;
    serde_json::from_value(value).map_err(|err| {
        HarnessError::Marshal(format!("argument is not a {}: {err}", T::descriptor()))
    })
}

// ── Stubs ─────────────────────────────────────────────────────────────────────

/// A typed view over one remote capability.
pub trait RemoteCapability: Sized {
    /// Capability name resolved in the remote service registry.
    const NAME: &'static str;

    /// Wrap a stub bound to [`Self::NAME`].
    fn bind(stub: CapabilityStub) -> Self;
}

/// Forwards calls for one capability over a shared server handle.
#[derive(Debug, Clone)]
pub struct CapabilityStub {
    server: Arc<ServerHandle>,
    capability: String,
    timeout: Duration,
}

impl CapabilityStub {
    /// Stub for `capability`; every call is bounded by `timeout` (zero waits
    /// indefinitely).
    #[must_use]
    pub fn new(server: Arc<ServerHandle>, capability: impl Into<String>, timeout: Duration) -> Self {
        Self {
            server,
            capability: capability.into(),
            timeout,
        }
    }

    /// Capability name.
    #[must_use]
    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Per-call deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build the request a call to `method` with `args` sends.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Marshal` if an argument cannot be serialized.
    pub fn request<A: Arguments>(&self, method: &str, args: A) -> Result<InvocationRequest> {
        Ok(InvocationRequest {
            capability: self.capability.clone(),
            method: method.to_owned(),
            parameter_types: A::descriptors(),
            timeout_millis: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            arguments: args.into_values()?,
        })
    }

    /// Invoke `method` remotely and decode its return value.
    ///
    /// # Errors
    ///
    /// Returns the remote failure re-raised as the matching `HarnessError`
    /// variant, `HarnessError::Channel` on transport failure or timeout, or
    /// `HarnessError::Marshal` if the return value does not decode as `R`.
    pub async fn call<A, R>(&self, method: &str, args: A) -> Result<R>
    where
        A: Arguments,
        R: DeserializeOwned,
    {
        let request = self.request(method, args)?;
        let value = self.server.invoke(request).await?;
        serde_json::from_value(value).map_err(|err| {
            HarnessError::Marshal(format!(
                "{}.{method} returned an unexpected value: {err}",
                self.capability
            ))
        })
    }
}
