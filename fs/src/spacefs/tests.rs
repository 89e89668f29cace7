use std::io::{Cursor, SeekFrom};

use pretty_assertions::assert_eq;
use rstest::*;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use super::{Handle, OpenFlags, SpaceFs};
use crate::fixtures::{BLOB_A, BLOB_A_CHECKSUM, BLOB_B};
use crate::inodes::Inodes;
use crate::spaces::{MemorySpaceService, SpaceService};
use crate::{blobservice, nodestore, Error};

#[fixture]
async fn space_fs() -> SpaceFs {
    space_fs_on("memory://").await
}

async fn space_fs_on(node_store_addr: &str) -> SpaceFs {
    let inodes = Inodes::new(nodestore::from_addr(node_store_addr).await.unwrap());
    let blob_service = blobservice::from_addr("memory://").await.unwrap();
    let space = MemorySpaceService::new(inodes.clone())
        .create(&Uuid::new_v4(), "test", vec![])
        .await
        .unwrap();

    SpaceFs::new(space, inodes, blob_service)
}

async fn read_all(fs: &SpaceFs, p: &str) -> Vec<u8> {
    let node = fs.get(p).await.unwrap();
    let mut r = fs.download(&node).await.unwrap();
    let mut buf = Vec::new();
    r.read_to_end(&mut buf).await.unwrap();
    buf
}

#[rstest]
#[tokio::test]
async fn upload_then_download(#[future] space_fs: SpaceFs) {
    let fs = space_fs.await;
    fs.create_dir_all("/docs").await.unwrap();

    let node = fs
        .upload("/docs/a.txt", Cursor::new(BLOB_A.clone()))
        .await
        .unwrap();
    assert_eq!(BLOB_A.len() as u64, node.size);
    assert_eq!(Some(BLOB_A_CHECKSUM.clone()), node.checksum);
    assert_eq!(Some("text/plain".to_string()), node.mime);

    assert_eq!(*BLOB_A, read_all(&fs, "/docs/a.txt").await);
    assert_eq!(BLOB_A.len() as u64, fs.get("/docs").await.unwrap().size);
    assert_eq!(BLOB_A.len() as u64, fs.get("/").await.unwrap().size);
}

#[rstest]
#[tokio::test]
async fn upload_errors(#[future] space_fs: SpaceFs) {
    let fs = space_fs.await;

    assert!(matches!(
        fs.upload("/missing/a.txt", Cursor::new(vec![1])).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        fs.upload("/", Cursor::new(vec![1])).await,
        Err(Error::Invalid(_))
    ));

    fs.upload("/a", Cursor::new(vec![1])).await.unwrap();
    assert!(matches!(
        fs.upload("/a", Cursor::new(vec![2])).await,
        Err(Error::AlreadyExists(_))
    ));
    assert!(matches!(
        fs.upload("/a/b", Cursor::new(vec![2])).await,
        Err(Error::NotADirectory(_))
    ));
}

#[rstest]
#[tokio::test]
async fn remove_all_rolls_up(#[future] space_fs: SpaceFs) {
    let fs = space_fs.await;
    fs.create_dir_all("/a/b/c").await.unwrap();
    fs.upload("/a/b/c/f", Cursor::new(vec![0u8; 100]))
        .await
        .unwrap();
    fs.upload("/a/g", Cursor::new(vec![0u8; 10])).await.unwrap();

    fs.remove_all("/a/b/c/f").await.unwrap();

    assert!(fs.get("/a/b/c/f").await.unwrap_err().is_not_found());
    assert_eq!(0, fs.get("/a/b/c").await.unwrap().size);
    assert_eq!(0, fs.get("/a/b").await.unwrap().size);
    assert_eq!(10, fs.get("/a").await.unwrap().size);

    // removing a missing path is fine.
    fs.remove_all("/a/b/c/f").await.expect("must succeed");
}

#[rstest]
#[tokio::test]
async fn open_directory(#[future] space_fs: SpaceFs) {
    let fs = space_fs.await;
    for name in ["a", "b", "c"] {
        fs.create_dir(&format!("/dir/{}", name))
            .await
            .expect_err("parent is missing");
    }
    fs.create_dir("/dir").await.unwrap();
    for name in ["c", "a", "b"] {
        fs.create_dir(&format!("/dir/{}", name)).await.unwrap();
    }

    let mut h = fs.open_file("/dir", OpenFlags::empty()).await.unwrap();
    assert!(matches!(h, Handle::Directory(_)));

    let mut buf = [0u8; 4];
    assert!(matches!(h.read(&mut buf).await, Err(Error::IsADirectory(_))));
    assert!(matches!(h.write(b"x").await, Err(Error::IsADirectory(_))));
    assert!(matches!(
        h.seek(SeekFrom::Start(0)).await,
        Err(Error::IsADirectory(_))
    ));

    let names = |nodes: Vec<crate::Node>| nodes.into_iter().map(|n| n.name).collect::<Vec<_>>();
    assert_eq!(vec!["a", "b"], names(h.read_dir(2).await.unwrap().unwrap()));
    assert_eq!(vec!["c"], names(h.read_dir(2).await.unwrap().unwrap()));
    assert_eq!(None, h.read_dir(2).await.unwrap());
}

#[rstest]
#[tokio::test]
async fn open_flags(#[future] space_fs: SpaceFs) {
    let fs = space_fs.await;
    fs.upload("/f", Cursor::new(vec![1, 2, 3])).await.unwrap();

    assert!(matches!(
        fs.open_file("/f", OpenFlags::CREATE | OpenFlags::EXCL).await,
        Err(Error::AlreadyExists(_))
    ));
    assert!(matches!(
        fs.open_file("/nope", OpenFlags::empty()).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        fs.open_file("/f", OpenFlags::APPEND).await,
        Err(Error::Unsupported(_))
    ));
    assert!(matches!(
        fs.open_file("/f", OpenFlags::WRITE).await,
        Err(Error::Invalid(_))
    ));
    assert!(matches!(
        fs.open_file("/missing/f", OpenFlags::WRITE | OpenFlags::CREATE).await,
        Err(Error::NotFound(_))
    ));
}

#[rstest]
#[tokio::test]
async fn read_and_seek(#[future] space_fs: SpaceFs) {
    let fs = space_fs.await;
    fs.upload("/b", Cursor::new(BLOB_B.clone())).await.unwrap();

    let mut h = fs.open_file("/b", OpenFlags::empty()).await.unwrap();
    assert_eq!(100, h.seek(SeekFrom::Start(100)).await.unwrap());

    let mut buf = [0u8; 10];
    let n = h.read(&mut buf).await.unwrap();
    assert_eq!(&BLOB_B[100..100 + n], &buf[..n]);

    // a reading handle can't start writing.
    assert!(matches!(h.write(b"x").await, Err(Error::Invalid(_))));
    assert!(matches!(h.read_dir(10).await, Err(Error::Invalid(_))));
}

#[rstest]
#[tokio::test]
async fn write_truncates(#[future] space_fs: SpaceFs) {
    let fs = space_fs.await;
    fs.upload("/f", Cursor::new(vec![0u8; 50])).await.unwrap();

    let mut h = fs
        .open_file(
            "/f",
            OpenFlags::READ_WRITE | OpenFlags::CREATE | OpenFlags::TRUNC,
        )
        .await
        .unwrap();
    assert_eq!(None, h.node());

    h.write(b"hello ").await.unwrap();
    h.write(b"world").await.unwrap();

    // the writing handle can't switch to reading.
    let mut buf = [0u8; 4];
    assert!(matches!(h.read(&mut buf).await, Err(Error::Invalid(_))));

    let node = h.close().await.unwrap().unwrap();
    assert_eq!(11, node.size);
    assert_eq!(b"hello world".to_vec(), read_all(&fs, "/f").await);
    assert_eq!(11, fs.get("/").await.unwrap().size);
}

#[rstest]
#[tokio::test]
async fn create_without_writing(#[future] space_fs: SpaceFs) {
    let fs = space_fs.await;

    let h = fs
        .open_file("/empty", OpenFlags::WRITE | OpenFlags::CREATE)
        .await
        .unwrap();
    let node = h.close().await.unwrap().unwrap();

    assert_eq!(0, node.size);
    assert_eq!(node, fs.get("/empty").await.unwrap());
}

/// Reading a freshly created handle pins it as a reader, writing through
/// it afterwards is refused.
#[rstest]
#[tokio::test]
async fn created_handle_read_then_write(#[future] space_fs: SpaceFs) {
    let fs = space_fs.await;

    let mut h = fs
        .open_file("/new", OpenFlags::READ_WRITE | OpenFlags::CREATE)
        .await
        .unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(0, h.read(&mut buf).await.unwrap());
    assert_eq!(
        Err(Error::Invalid("/new: concurrent read and write".to_string())),
        h.write(b"data").await
    );

    // closing still stores the file as empty.
    let node = h.close().await.unwrap().unwrap();
    assert_eq!(0, node.size);
    assert_eq!(0, fs.get("/").await.unwrap().size);
}

#[rstest]
#[tokio::test]
async fn move_and_rename(#[future] space_fs: SpaceFs) {
    let fs = space_fs.await;
    let f = fs.upload("/f", Cursor::new(vec![0u8; 5])).await.unwrap();

    let moved = fs.move_to(&f, "/x/y").await.unwrap();
    assert_eq!(f.id, fs.get("/x/y").await.unwrap().id);
    assert_eq!(5, fs.get("/x").await.unwrap().size);

    fs.upload("/x/z", Cursor::new(vec![0u8; 1])).await.unwrap();
    let renamed = fs.rename(&moved, "z").await.unwrap();
    assert_eq!("z (1)", renamed.name);
}

#[rstest]
#[tokio::test]
async fn download_directory(#[future] space_fs: SpaceFs) {
    let fs = space_fs.await;
    let root = fs.get("/").await.unwrap();

    assert!(matches!(
        fs.download(&root).await,
        Err(Error::IsADirectory(_))
    ));
}

#[rstest]
#[tokio::test]
async fn dropped_writer_leaves_nothing(#[future] space_fs: SpaceFs) {
    let fs = space_fs.await;

    let mut h = fs
        .open_file("/f", OpenFlags::WRITE | OpenFlags::CREATE)
        .await
        .unwrap();
    h.write(b"partial").await.unwrap();
    drop(h);
    tokio::task::yield_now().await;

    assert!(fs.get("/f").await.unwrap_err().is_not_found());
    assert_eq!(0, fs.get("/").await.unwrap().size);
}

/// Concurrent uploads below one directory must each contribute their size.
#[rstest]
#[case::memory("memory://")]
#[case::redb("redb://")]
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_uploads_roll_up(#[case] node_store_addr: &str) {
    let fs = space_fs_on(node_store_addr).await;
    fs.create_dir_all("/d").await.unwrap();

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let fs = fs.clone();
            tokio::spawn(async move {
                fs.upload(&format!("/d/{}", i), Cursor::new(vec![7u8; 10]))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().expect("upload must succeed");
    }

    let children = fs.list_dir("/d", None, 100).await.unwrap();
    assert_eq!(32, children.len());
    assert_eq!(320, fs.get("/d").await.unwrap().size);
    assert_eq!(320, fs.get("/").await.unwrap().size);
}

/// Of several uploads racing for the same name exactly one wins, the others
/// fail and leave no node behind.
#[rstest]
#[case::memory("memory://")]
#[case::redb("redb://")]
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_uploads_same_name(#[case] node_store_addr: &str) {
    let fs = space_fs_on(node_store_addr).await;

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let fs = fs.clone();
            tokio::spawn(async move { fs.upload("/same", Cursor::new(vec![7u8; 10])).await })
        })
        .collect();

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert_eq!(Error::AlreadyExists("same".to_string()), e),
        }
    }

    assert_eq!(1, succeeded);
    assert_eq!(1, fs.list_dir("/", None, 100).await.unwrap().len());
    assert_eq!(10, fs.get("/").await.unwrap().size);
}

/// Racing `create_dir_all` calls over a shared prefix all end up with the
/// same directories.
#[rstest]
#[case::memory("memory://")]
#[case::redb("redb://")]
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_create_dir_all(#[case] node_store_addr: &str) {
    let fs = space_fs_on(node_store_addr).await;

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let fs = fs.clone();
            tokio::spawn(async move {
                fs.create_dir_all(&format!("/a/b/{}", i % 4)).await
            })
        })
        .collect();

    let mut leaves = Vec::new();
    for task in tasks {
        leaves.push(task.await.unwrap().expect("create_dir_all must succeed"));
    }

    let b = fs.get("/a/b").await.unwrap();
    assert_eq!(1, fs.list_dir("/", None, 100).await.unwrap().len());
    assert_eq!(1, fs.list_dir("/a", None, 100).await.unwrap().len());
    assert_eq!(4, fs.list_dir("/a/b", None, 100).await.unwrap().len());
    for leaf in leaves {
        assert_eq!(Some(b.id), leaf.parent);
        assert_eq!(leaf, fs.get(&format!("/a/b/{}", leaf.name)).await.unwrap());
    }
}
