use std::{convert::Infallible, marker::PhantomData, sync::Arc};

use socketwire_core::Value;

use crate::{
    adapter::Adapter,
    handler::{AckRequest, FromConnectParts, FromDisconnectParts, FromMessageParts},
    socket::{DisconnectReason, Socket},
};

/// The requested extension is missing.
pub struct ExtensionNotFound<T>(PhantomData<T>);

impl<T> std::fmt::Display for ExtensionNotFound<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "extension of type {} not found",
            std::any::type_name::<T>()
        )
    }
}
impl<T> std::fmt::Debug for ExtensionNotFound<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExtensionNotFound<{}>", std::any::type_name::<T>())
    }
}
impl<T> std::error::Error for ExtensionNotFound<T> {}

/// A clone of a value stored with [`Socket::extensions`].
/// The handler is not called if the value is missing.
pub struct Extension<T>(pub T);

/// A clone of a value stored with [`Socket::extensions`], if it exists.
pub struct MaybeExtension<T>(pub Option<T>);

/// A clone of an extension of the http request that opened the connection.
/// The handler is not called if it is missing.
pub struct HttpExtension<T>(pub T);

/// A clone of an extension of the http request that opened the connection, if it exists.
pub struct MaybeHttpExtension<T>(pub Option<T>);

fn extension<T: Clone + Send + Sync + 'static>(
    s: &Socket<impl Adapter>,
) -> Result<T, ExtensionNotFound<T>> {
    s.extensions.get::<T>().ok_or(ExtensionNotFound(PhantomData))
}

fn http_extension<T: Clone + Send + Sync + 'static>(
    s: &Socket<impl Adapter>,
) -> Result<T, ExtensionNotFound<T>> {
    s.req_parts()
        .extensions
        .get::<T>()
        .cloned()
        .ok_or(ExtensionNotFound(PhantomData))
}

/// Implements the three extractor traits for an extension extractor.
macro_rules! impl_extractor {
    ($ident:ident, $get:ident, required) => {
        impl_extractor!(@impl $ident, ExtensionNotFound<T>, |s| $get(s).map($ident));
    };
    ($ident:ident, $get:ident, optional) => {
        impl_extractor!(@impl $ident, Infallible, |s| Ok($ident($get(s).ok())));
    };
    (@impl $ident:ident, $err:ty, |$s:ident| $body:expr) => {
        impl<A: Adapter, T: Clone + Send + Sync + 'static> FromConnectParts<A> for $ident<T> {
            type Error = $err;
            fn from_connect_parts($s: &Arc<Socket<A>>, _: &Option<Value>) -> Result<Self, $err> {
                $body
            }
        }
        impl<A: Adapter, T: Clone + Send + Sync + 'static> FromMessageParts<A> for $ident<T> {
            type Error = $err;
            fn from_message_parts(
                $s: &Arc<Socket<A>>,
                _: &mut Vec<Value>,
                _: &Option<AckRequest>,
            ) -> Result<Self, $err> {
                $body
            }
        }
        impl<A: Adapter, T: Clone + Send + Sync + 'static> FromDisconnectParts<A> for $ident<T> {
            type Error = $err;
            fn from_disconnect_parts($s: &Arc<Socket<A>>, _: DisconnectReason) -> Result<Self, $err> {
                $body
            }
        }
    };
}

impl_extractor!(Extension, extension, required);
impl_extractor!(MaybeExtension, extension, optional);
impl_extractor!(HttpExtension, http_extension, required);
impl_extractor!(MaybeHttpExtension, http_extension, optional);

super::impl_deref!(Extension);
super::impl_deref!(MaybeExtension: Option<T>);
super::impl_deref!(HttpExtension);
super::impl_deref!(MaybeHttpExtension: Option<T>);

#[cfg(test)]
mod tests {
    use socketwire_core::Sid;

    use super::*;
    use crate::{adapter::LocalAdapter, ns::Namespace};

    #[derive(Clone, Debug, PartialEq)]
    struct User(&'static str);

    #[tokio::test]
    async fn socket_extensions() {
        let sid = Sid::new();
        let ns = Namespace::<LocalAdapter>::new_dummy([sid]);
        let s = ns.get_socket(sid).unwrap();

        assert!(Extension::<User>::from_connect_parts(&s, &None).is_err());
        let MaybeExtension(user) = MaybeExtension::<User>::from_connect_parts(&s, &None).unwrap();
        assert_eq!(user, None);

        s.extensions.insert(User("alice"));
        let Extension(user) =
            Extension::<User>::from_disconnect_parts(&s, DisconnectReason::TransportClose).unwrap();
        assert_eq!(user, User("alice"));

        let err = HttpExtension::<User>::from_message_parts(&s, &mut vec![], &None)
            .err()
            .unwrap();
        assert!(err.to_string().contains("User"));
    }
}
