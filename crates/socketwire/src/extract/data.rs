use std::{convert::Infallible, sync::Arc};

use serde::de::DeserializeOwned;
use socketwire_core::{
    Value,
    value::{ValueError, from_args, from_value},
};

use crate::{
    adapter::Adapter,
    handler::{AckRequest, FromConnectParts, FromMessageParts},
    socket::Socket,
};

/// Deserializes the auth payload of a connect, or the arguments of an event.
/// If deserialization fails the handler is not called.
///
/// Event arguments are deserialized as a tuple when there are several of them,
/// and as the value itself when there is only one. Binary attachments deserialize
/// to [`bytes::Bytes`].
pub struct Data<T>(pub T);

/// Like [`Data`], but the handler receives the deserialization result.
pub struct TryData<T>(pub Result<T, ValueError>);

fn decode_auth<T: DeserializeOwned>(auth: &Option<Value>) -> Result<T, ValueError> {
    from_value(auth.clone().unwrap_or(Value::Null))
}

impl<T: DeserializeOwned, A: Adapter> FromConnectParts<A> for Data<T> {
    type Error = ValueError;
    fn from_connect_parts(_: &Arc<Socket<A>>, auth: &Option<Value>) -> Result<Self, ValueError> {
        decode_auth(auth).map(Data)
    }
}

impl<T: DeserializeOwned, A: Adapter> FromMessageParts<A> for Data<T> {
    type Error = ValueError;
    fn from_message_parts(
        _: &Arc<Socket<A>>,
        args: &mut Vec<Value>,
        _: &Option<AckRequest>,
    ) -> Result<Self, ValueError> {
        from_args(args.clone()).map(Data)
    }
}

impl<T: DeserializeOwned, A: Adapter> FromConnectParts<A> for TryData<T> {
    type Error = Infallible;
    fn from_connect_parts(_: &Arc<Socket<A>>, auth: &Option<Value>) -> Result<Self, Infallible> {
        Ok(TryData(decode_auth(auth)))
    }
}

impl<T: DeserializeOwned, A: Adapter> FromMessageParts<A> for TryData<T> {
    type Error = Infallible;
    fn from_message_parts(
        _: &Arc<Socket<A>>,
        args: &mut Vec<Value>,
        _: &Option<AckRequest>,
    ) -> Result<Self, Infallible> {
        Ok(TryData(from_args(args.clone())))
    }
}

super::impl_deref!(Data);
super::impl_deref!(TryData: Result<T, ValueError>);
