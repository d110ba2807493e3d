//! Test helper utilities
//!
//! Shared app setup for beatreel-server integration tests. External tools
//! and pipeline scripts are stand-in shell scripts written to a temp dir.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use beatreel_common::events::EventBus;
use beatreel_server::services::ToolResolver;
use beatreel_server::AppState;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const BOUNDARY: &str = "beatreel-test-boundary";

/// Router plus the temp folders behind it
pub struct TestApp {
    pub tmp: TempDir,
    pub state: AppState,
}

impl TestApp {
    /// App with no external tools available
    pub fn new() -> Self {
        Self::with_tools(ToolResolver::empty())
    }

    pub fn with_tools(tools: ToolResolver) -> Self {
        let tmp = TempDir::new().expect("Failed to create temp dir");
        let root = tmp.path().join("projects");
        let scripts = tmp.path().join("scripts");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&scripts).unwrap();

        let state = AppState::with_tools(root, scripts, EventBus::new(256), tools);
        Self { tmp, state }
    }

    pub fn router(&self) -> Router {
        beatreel_server::build_router(self.state.clone())
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.tmp.path().join("scripts")
    }

    pub fn project_dir(&self, id: &str) -> PathBuf {
        self.state.registry.project_dir(id).unwrap()
    }

    /// Write a pipeline script into the scripts folder
    pub fn write_script(&self, name: &str, body: &str) {
        std::fs::write(self.scripts_dir().join(name), format!("#!/bin/bash\n{}\n", body)).unwrap();
    }

    pub async fn create_project(&self, name: &str, variant: Option<&str>) -> String {
        self.state.registry.create(name, variant).await.unwrap().id
    }

    /// Project with one image and one audio file, ready to process
    pub async fn ready_project(&self, name: &str) -> String {
        let id = self.create_project(name, None).await;
        let dir = self.project_dir(&id);
        std::fs::write(dir.join("a.jpg"), b"jpg").unwrap();
        std::fs::write(dir.join("song.mp3"), b"id3").unwrap();
        id
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    /// Poll the status endpoint until the project has no active run
    pub async fn wait_until_idle(&self, id: &str) {
        for _ in 0..200 {
            let (_, body) = self.send(get(&format!("/api/process/{}/status", id))).await;
            if body["isProcessing"] == Value::Bool(false) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("run for {} never finished", id);
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn empty(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn json(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// One multipart part: text field when `filename` is `None`
pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub data: &'a [u8],
}

pub fn multipart(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part.filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    part.name, filename
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name).as_bytes(),
            ),
        }
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}
