//! Per-request context handed to middleware and route actions.
//!
//! A [`Context`] owns the [`Request`] and carries what the dispatcher learned
//! about it: the parameters captured by the route matcher, the data returned
//! by the authorizer that admitted it, and a typed [`Extensions`] map that
//! middleware can use to pass values down to actions.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    path::Path,
    sync::Arc,
};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::form::{self, FormData};
use crate::fs::StaticFiles;
use crate::http::{BodyError, Request, Response};

/// Type-erased request extensions, keyed by type.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value`, returning the previous value of the same type.
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// Parameters captured by the route matcher.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Parameters {
    map: HashMap<String, String>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.map.remove(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Failure reading a JSON request body.
#[derive(Debug, Error)]
pub enum JsonBodyError {
    #[error(transparent)]
    Body(#[from] BodyError),

    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-request state.
pub struct Context {
    request: Request,
    params: Parameters,
    extensions: Extensions,
    auth: Option<Value>,
    files: Arc<StaticFiles>,
    debug: bool,
}

impl Context {
    pub fn new(request: Request, files: Arc<StaticFiles>) -> Self {
        Self {
            request,
            params: Parameters::new(),
            extensions: Extensions::new(),
            auth: None,
            files,
            debug: false,
        }
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub(crate) fn set_params(&mut self, params: Parameters) {
        self.params = params;
    }

    pub(crate) fn set_auth(&mut self, data: Option<Value>) {
        self.auth = data;
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Data returned by the authorizer that admitted this request.
    pub fn auth_data(&self) -> Option<&Value> {
        self.auth.as_ref()
    }

    pub fn files(&self) -> &StaticFiles {
        &self.files
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Waits for the whole body and decodes it as a form.
    ///
    /// Content types other than urlencoded and multipart give an empty form.
    ///
    /// # Errors
    ///
    /// [`BodyError::Incomplete`] if the client went away mid-body.
    pub async fn form(&self) -> Result<FormData, BodyError> {
        let body = self.request.body().wait_complete().await?;
        Ok(form::decode(
            self.request.headers().get("content-type"),
            &body,
        ))
    }

    /// Waits for the whole body and deserializes it from JSON.
    ///
    /// # Errors
    ///
    /// [`JsonBodyError`] if the body is incomplete or not valid JSON for `T`.
    pub async fn body_json<T>(&self) -> Result<T, JsonBodyError>
    where
        T: DeserializeOwned,
    {
        let body = self.request.body().wait_complete().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Serves a file with range and conditional support.
    ///
    /// `None` serves the file the request path points at; `Some(path)` serves
    /// that filesystem path. Failures are rendered as error responses.
    pub async fn file(&self, path: Option<&Path>) -> Response {
        let result = match path {
            Some(path) => self.files.serve_path(path, &self.request).await,
            None => self.files.serve(&self.request).await,
        };
        result.unwrap_or_else(|e| e.into_response(self.debug))
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request", &self.request)
            .field("params", &self.params)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use serde::Deserialize;

    use crate::http::{RequestBody, StatusCode};

    fn context(raw: &str, body: &'static [u8], root: &Path) -> Context {
        let (request, _) = Request::parse(raw.as_bytes()).unwrap();
        let request = request.with_body(RequestBody::complete(Bytes::from_static(body)));
        Context::new(request, Arc::new(StaticFiles::new(root)))
    }

    #[test]
    fn extensions_are_typed() {
        #[derive(Debug, PartialEq)]
        struct RequestId(u64);

        let mut ext = Extensions::new();
        assert_eq!(ext.insert(RequestId(1)), None);
        assert_eq!(ext.insert(RequestId(2)), Some(RequestId(1)));
        ext.get_mut::<RequestId>().unwrap().0 += 1;
        assert_eq!(ext.get::<RequestId>(), Some(&RequestId(3)));
        assert_eq!(ext.get::<String>(), None);
        assert_eq!(ext.remove::<RequestId>(), Some(RequestId(3)));
        assert_eq!(ext.get::<RequestId>(), None);
    }

    #[tokio::test]
    async fn form_uses_request_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(
            "POST /f HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\n",
            b"name=Ada&lang=rust",
            dir.path(),
        );
        let form = ctx.form().await.unwrap();
        assert_eq!(form.get("name").and_then(|f| f.text()), Some("Ada"));
        assert_eq!(form.len(), 2);
    }

    #[tokio::test]
    async fn json_body() {
        #[derive(Deserialize)]
        struct Login {
            user: String,
        }

        let dir = tempfile::tempdir().unwrap();
        let ctx = context("POST /j HTTP/1.1\r\n\r\n", br#"{"user":"ada"}"#, dir.path());
        let login: Login = ctx.body_json().await.unwrap();
        assert_eq!(login.user, "ada");

        let ctx = context("POST /j HTTP/1.1\r\n\r\n", b"{", dir.path());
        assert!(matches!(ctx.body_json::<Login>().await, Err(JsonBodyError::Json(_))));
    }

    #[tokio::test]
    async fn file_helper_serves_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page.html"), "<p>x</p>").unwrap();
        let ctx = context("GET /anything HTTP/1.1\r\n\r\n", b"", dir.path());

        let response = ctx.file(Some(&dir.path().join("page.html"))).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.headers().get("content-type"), Some("text/html"));

        let response = ctx.file(None).await;
        assert_eq!(response.status(), StatusCode::NotFound);
    }
}
