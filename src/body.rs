//! Exactly-once body consumption.

use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;

use serde::de::DeserializeOwned;

use crate::blob::Blob;
use crate::form::{self, FormData};
use crate::payload::{BodyInit, Payload};
use crate::Error;

/// Body capability shared by requests and responses.
///
/// Every read marks the body used, synchronously, before the returned future is
/// polled. A second read fails with [`Error::BodyUsed`] even while the first is
/// still pending.
#[derive(Debug)]
pub(crate) struct Body {
    owner: &'static str,
    used: Cell<bool>,
    payload: Option<Rc<Payload>>,
}

impl Body {
    pub fn init(owner: &'static str, init: Option<BodyInit>) -> Result<Self, Error> {
        let payload = match init {
            Some(init) => Some(Rc::new(Payload::new(init)?)),
            None => None,
        };
        Ok(Body::with_payload(owner, payload))
    }

    pub fn with_payload(owner: &'static str, payload: Option<Rc<Payload>>) -> Self {
        Body {
            owner,
            used: Cell::new(false),
            payload,
        }
    }

    pub fn body_used(&self) -> bool {
        self.used.get()
    }

    pub fn payload(&self) -> Option<&Rc<Payload>> {
        self.payload.as_ref()
    }

    /// Hand the payload over without reading, as when the body moves to another
    /// request. A body without payload stays unused.
    pub fn take(&self) -> Result<Option<Rc<Payload>>, Error> {
        if self.payload.is_none() && !self.used.get() {
            return Ok(None);
        }
        self.consume()
    }

    fn consume(&self) -> Result<Option<Rc<Payload>>, Error> {
        if self.used.get() {
            return Err(Error::BodyUsed(self.owner));
        }
        self.used.set(true);
        Ok(self.payload.clone())
    }

    pub fn text(&self) -> impl Future<Output = Result<String, Error>> {
        let payload = self.consume();
        async move { Ok(payload?.map(|p| p.text()).unwrap_or_default()) }
    }

    pub fn json<T: DeserializeOwned>(&self) -> impl Future<Output = Result<T, Error>> {
        let text = self.text();
        async move {
            let text = text.await?;
            Ok(serde_json::from_str(&text)?)
        }
    }

    pub fn array_buffer(&self) -> impl Future<Output = Result<Vec<u8>, Error>> {
        let payload = self.consume();
        async move { Ok(payload?.map(|p| p.array_buffer()).unwrap_or_default()) }
    }

    pub fn bytes(&self) -> impl Future<Output = Result<Vec<u8>, Error>> {
        self.array_buffer()
    }

    pub fn blob(&self) -> impl Future<Output = Result<Blob, Error>> {
        let payload = self.consume();
        async move {
            Ok(match payload? {
                Some(p) => Blob::new(p.array_buffer(), p.content_type_hint()),
                None => Blob::default(),
            })
        }
    }

    /// Parse as multipart, with the boundary taken from the owner's `content-type`.
    pub fn form_data(
        &self,
        content_type: Option<&str>,
    ) -> impl Future<Output = Result<FormData, Error>> {
        let payload = self.consume();
        let boundary = content_type.and_then(form::boundary_from_content_type);
        async move {
            let payload = payload?;
            let boundary = boundary.ok_or_else(|| {
                Error::Syntax("multipart: no boundary in content-type".into())
            })?;
            let bytes = payload.map(|p| p.array_buffer()).unwrap_or_default();
            form::decode(&bytes, Some(&boundary))
        }
    }
}
