//! Package Push Integration Tests
//!
//! ## Test Coverage
//!
//! - Full transaction against a mock server
//! - Metadata body is the signed canonical JSON
//! - A failing object aborts the push before finish
//! - Phase reported for metadata, objects and finish failures
//! - Package status query

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uhu::auth::{canonical_json, sign_dict, Credentials, StaticCredentials};
    use uhu::http::HttpClient;
    use uhu::package::{ObjectDescriptor, Package};
    use uhu::progress::SilentProgress;
    use uhu::push::{PackagePusher, Phase, PushError};
    use uhu::upload::{ObjectUploader, UploadError, UploadOutcome};
    use wiremock::matchers::{body_bytes, header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> HttpClient {
        HttpClient::new(Arc::new(StaticCredentials::new("id", "secret"))).unwrap()
    }

    fn write_package(dir: &Path) -> Package {
        std::fs::write(dir.join("rootfs.img"), vec![1u8; 3000]).unwrap();
        std::fs::write(dir.join("kernel.img"), vec![2u8; 1000]).unwrap();
        std::fs::write(
            dir.join("package.json"),
            json!({
                "product": "0123456789",
                "version": "1.0",
                "supported-hardware": "any",
                "objects": [[
                    {"filename": "rootfs.img", "mode": "raw", "target": "/dev/sda1"},
                    {"filename": "kernel.img", "mode": "copy", "target": "/boot/uImage"}
                ]]
            })
            .to_string(),
        )
        .unwrap();
        Package::load(dir.join("package.json"), &SilentProgress).unwrap()
    }

    /// Uploader returning a fixed outcome per filename
    struct ScriptedUploader {
        failing: Option<String>,
        calls: AtomicUsize,
    }

    impl ScriptedUploader {
        fn new(failing: Option<&str>) -> Self {
            Self {
                failing: failing.map(str::to_string),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ObjectUploader for ScriptedUploader {
        async fn upload_object(&self, object: &ObjectDescriptor, _uid: &str) -> UploadOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.as_deref() == Some(object.filename.as_str()) {
                UploadOutcome::Fail(UploadError::InvalidResponse("boom".into()))
            } else {
                UploadOutcome::Exists
            }
        }
    }

    async fn mount_metadata(mock_server: &MockServer, uid: &str) {
        Mock::given(method("POST"))
            .and(path("/packages"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"uid": uid})))
            .expect(1)
            .mount(mock_server)
            .await;
    }

    // ========================================================================
    // TEST: Successful push
    // ========================================================================

    #[tokio::test]
    async fn test_push_package_success() {
        let mock_server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let package = write_package(dir.path());

        mount_metadata(&mock_server, "1234").await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/packages/1234/objects/[0-9a-f]{64}$"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "storage": "s3",
                "url": format!("{}/storage/blob", mock_server.uri()),
            })))
            .expect(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/storage/blob"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/packages/1234/finish"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let pusher = PackagePusher::new(client(), mock_server.uri(), Arc::new(SilentProgress))
            .with_concurrency(2);
        let uid = pusher.push_package(&package).await.unwrap();
        assert_eq!(uid, "1234");
    }

    #[tokio::test]
    async fn test_metadata_is_signed_canonical_json() {
        let mock_server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let package = write_package(dir.path());

        let credentials = Credentials::new("id", "secret");
        let signature = sign_dict(package.metadata(), &credentials);
        let body = canonical_json(package.metadata());

        Mock::given(method("POST"))
            .and(path("/packages"))
            .and(header("UH-SIGNATURE", signature.as_str()))
            .and(header("Content-Type", "application/json"))
            .and(body_bytes(body.into_bytes()))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"uid": "1"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let pusher = PackagePusher::new(client(), mock_server.uri(), Arc::new(SilentProgress));
        let uid = pusher.upload_metadata(package.metadata()).await.unwrap();
        assert_eq!(uid, "1");
    }

    #[tokio::test]
    async fn test_existing_objects_still_finish() {
        let mock_server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let package = write_package(dir.path());

        mount_metadata(&mock_server, "1234").await;
        Mock::given(method("PUT"))
            .and(path("/packages/1234/finish"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let uploader = Arc::new(ScriptedUploader::new(None));
        let pusher = PackagePusher::new(client(), mock_server.uri(), Arc::new(SilentProgress))
            .with_uploader(uploader.clone());
        assert_eq!(pusher.push_package(&package).await.unwrap(), "1234");
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 2);
    }

    // ========================================================================
    // TEST: Failures
    // ========================================================================

    #[tokio::test]
    async fn test_failed_object_aborts_before_finish() {
        let mock_server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let package = write_package(dir.path());

        mount_metadata(&mock_server, "1234").await;
        Mock::given(method("PUT"))
            .and(path("/packages/1234/finish"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&mock_server)
            .await;

        let uploader = Arc::new(ScriptedUploader::new(Some("rootfs.img")));
        let pusher = PackagePusher::new(client(), mock_server.uri(), Arc::new(SilentProgress))
            .with_uploader(uploader.clone());
        let err = pusher.push_package(&package).await.unwrap_err();

        assert_eq!(err.phase(), Phase::Objects);
        assert!(matches!(err, PushError::Object { ref filename, .. } if filename == "rootfs.img"));
        // Sequential upload stops at the first failure
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_metadata_rejection() {
        let mock_server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let package = write_package(dir.path());

        Mock::given(method("POST"))
            .and(path("/packages"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"errors": {"product": ["not found"]}})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let uploader = Arc::new(ScriptedUploader::new(None));
        let pusher = PackagePusher::new(client(), mock_server.uri(), Arc::new(SilentProgress))
            .with_uploader(uploader.clone());
        let err = pusher.push_package(&package).await.unwrap_err();

        assert_eq!(err.phase(), Phase::Metadata);
        assert_eq!(err.to_string(), "- product: not found");
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_metadata_without_uid() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let package = write_package(dir.path());
        let pusher = PackagePusher::new(client(), mock_server.uri(), Arc::new(SilentProgress));
        let err = pusher.upload_metadata(package.metadata()).await.unwrap_err();
        assert!(matches!(err, PushError::Metadata(_)));
    }

    #[tokio::test]
    async fn test_finish_requires_no_content() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/packages/1234/finish"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let pusher = PackagePusher::new(client(), mock_server.uri(), Arc::new(SilentProgress));
        let err = pusher.finish_package("1234").await.unwrap_err();
        assert_eq!(err.phase(), Phase::Finish);
    }

    #[tokio::test]
    async fn test_finish_rejection_reports_finish_phase() {
        let mock_server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let package = write_package(dir.path());

        mount_metadata(&mock_server, "1234").await;
        Mock::given(method("PUT"))
            .and(path("/packages/1234/finish"))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(json!({"error_message": "incomplete"})),
            )
            .mount(&mock_server)
            .await;

        let pusher = PackagePusher::new(client(), mock_server.uri(), Arc::new(SilentProgress))
            .with_uploader(Arc::new(ScriptedUploader::new(None)));
        let err = pusher.push_package(&package).await.unwrap_err();
        assert_eq!(err.phase(), Phase::Finish);
        assert_eq!(err.to_string(), "incomplete");
    }

    // ========================================================================
    // TEST: Status
    // ========================================================================

    #[tokio::test]
    async fn test_package_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/packages/1234"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "finished"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let pusher = PackagePusher::new(client(), mock_server.uri(), Arc::new(SilentProgress));
        assert_eq!(pusher.get_package_status("1234").await.unwrap(), "finished");
    }

    #[tokio::test]
    async fn test_package_status_missing() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uid": "1234"})))
            .mount(&mock_server)
            .await;

        let pusher = PackagePusher::new(client(), mock_server.uri(), Arc::new(SilentProgress));
        let err = pusher.get_package_status("1234").await.unwrap_err();
        assert_eq!(err.phase(), Phase::Status);
    }

    #[tokio::test]
    async fn test_package_status_http_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let pusher = PackagePusher::new(client(), mock_server.uri(), Arc::new(SilentProgress));
        assert!(matches!(
            pusher.get_package_status("1234").await,
            Err(PushError::Status(_))
        ));
    }

    #[test]
    fn test_metadata_lists_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let package = write_package(dir.path());
        let objects = package.metadata()["objects"][0].as_array().unwrap();
        assert_eq!(objects.len(), 2);
        assert!(objects.iter().all(|o| o.get("sha256sum").map(Value::is_string) == Some(true)));
    }
}
