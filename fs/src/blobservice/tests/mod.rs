//! This contains test scenarios that a given [BlobService] needs to pass.
//! We use [rstest] and [rstest_reuse] to provide all services we want to test
//! against, and then apply this template to all test functions.

use rstest::*;
use rstest_reuse::{self, *};
use std::io;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;

use super::BlobService;
use crate::blobservice;
use crate::fixtures::{BLOB_A, BLOB_A_CHECKSUM, BLOB_B, BLOB_B_CHECKSUM};

/// This produces a template, which will be applied to all individual test functions.
/// See https://github.com/la10736/rstest/issues/130#issuecomment-968864832
#[template]
#[rstest]
#[case::memory(blobservice::from_addr("memory://").await.unwrap())]
#[case::simplefs(blobservice::from_addr(&format!("simplefs://{}", tempfile::TempDir::new().unwrap().into_path().display())).await.unwrap())]
pub fn blob_services(#[case] blob_service: impl BlobService) {}

/// Using [BlobService::has] on a non-existing blob should return false.
#[apply(blob_services)]
#[tokio::test]
async fn has_nonexistent_false(blob_service: impl BlobService) {
    assert!(!blob_service
        .has(&Uuid::new_v4())
        .await
        .expect("must not fail"));
}

/// Trying to read a non-existing blob should return a None instead of a reader.
#[apply(blob_services)]
#[tokio::test]
async fn not_found_read(blob_service: impl BlobService) {
    assert!(blob_service
        .open_read(&Uuid::new_v4())
        .await
        .expect("must not fail")
        .is_none())
}

/// Put a blob in the store, check has, get it back.
#[apply(blob_services)]
#[tokio::test]
async fn put_has_get(blob_service: impl BlobService) {
    for (blob_contents, blob_checksum) in [
        (&*BLOB_A, BLOB_A_CHECKSUM.as_str()),
        (&*BLOB_B, BLOB_B_CHECKSUM.as_str()),
    ] {
        let id = Uuid::new_v4();
        let mut w = blob_service.open_write(id).await;

        let l = tokio::io::copy(&mut io::Cursor::new(blob_contents), &mut w)
            .await
            .expect("copy must succeed");
        assert_eq!(
            blob_contents.len(),
            l as usize,
            "written bytes must match blob length"
        );

        let info = w.close().await.expect("close must succeed");
        assert_eq!(blob_contents.len() as u64, info.size);
        assert_eq!(blob_checksum, info.checksum);

        // closing twice returns the same info.
        assert_eq!(info, w.close().await.expect("close must succeed"));

        assert!(blob_service.has(&id).await.expect("must not fail"));

        let mut r = blob_service
            .open_read(&id)
            .await
            .expect("must not fail")
            .expect("must be some");

        let mut buf: Vec<u8> = Vec::new();
        let mut pinned_reader = std::pin::pin!(r);
        let l = pinned_reader
            .read_to_end(&mut buf)
            .await
            .expect("must succeed");

        assert_eq!(blob_contents.len(), l, "read bytes must match blob length");
        assert_eq!(&blob_contents[..], &buf, "read blob contents must match");
    }
}

/// Put a blob in the store, and seek inside it a bit.
#[apply(blob_services)]
#[tokio::test]
async fn put_seek(blob_service: impl BlobService) {
    let id = Uuid::new_v4();
    let mut w = blob_service.open_write(id).await;

    tokio::io::copy(&mut io::Cursor::new(&BLOB_B.to_vec()), &mut w)
        .await
        .expect("copy must succeed");
    w.close().await.expect("close must succeed");

    let mut r = blob_service
        .open_read(&id)
        .await
        .expect("must not fail")
        .expect("must be some");

    let pos = r
        .seek(io::SeekFrom::Start(42))
        .await
        .expect("must not fail");
    assert_eq!(42, pos);

    let mut buf = [0b0; 8];
    r.read_exact(&mut buf).await.expect("must succeed");
    assert_eq!(&BLOB_B[42..50], &buf);
}

/// Deleting a blob makes it unreachable, deleting it again is fine.
#[apply(blob_services)]
#[tokio::test]
async fn delete(blob_service: impl BlobService) {
    let id = Uuid::new_v4();
    let mut w = blob_service.open_write(id).await;
    tokio::io::copy(&mut io::Cursor::new(&BLOB_A.to_vec()), &mut w)
        .await
        .expect("copy must succeed");
    w.close().await.expect("close must succeed");

    blob_service.delete(&id).await.expect("must succeed");
    assert!(!blob_service.has(&id).await.expect("must not fail"));
    assert!(blob_service.open_read(&id).await.unwrap().is_none());

    blob_service.delete(&id).await.expect("must succeed");
}
