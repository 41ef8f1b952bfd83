use anyhow::Result;
use chrono::Local;
use lanbackup::log::{TransferLog, TransferStatus};
use lanbackup::protocol::frame;
use lanbackup::protocol_core::{archive_output_name, write_frame};
use lanbackup::{
    Address, ArchiveBuilder, BackupClient, BackupError, BackupServer, ServerState,
    TarArchiveBuilder,
};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::thread;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn pattern(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut val: u8 = 0;
    for _ in 0..size {
        data.push(val);
        val = val.wrapping_mul(31).wrapping_add(7);
    }
    data
}

fn write_file(path: &Path, size: usize) -> Result<Vec<u8>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = pattern(size);
    std::fs::write(path, &data)?;
    Ok(data)
}

fn listening_server(output: &Path) -> Result<BackupServer> {
    let mut server = BackupServer::bind(Address::localhost(), 0)?
        .with_output_dir(output)
        .with_read_timeout(Some(Duration::from_secs(10)));
    server.listen(None)?;
    Ok(server)
}

fn connect(port: u16) -> Result<BackupClient> {
    Ok(BackupClient::connect(Address::localhost(), port, CONNECT_TIMEOUT)?)
}

#[test]
fn text_file_lands_under_its_own_name() -> Result<()> {
    let srv_dir = tempfile::tempdir()?;
    let cli_dir = tempfile::tempdir()?;
    let source = cli_dir.path().join("notes.txt");
    std::fs::write(&source, b"hello\nworld\n")?;

    let mut server = listening_server(srv_dir.path())?;
    let port = server.port();
    let handle = thread::spawn(move || -> Result<Option<String>> {
        server.accept_client()?;
        assert_eq!(server.state(), ServerState::Receiving);
        let name = server.receive(4)?;
        server.end();
        assert_eq!(server.state(), ServerState::Listening);
        Ok(name)
    });

    let mut client = connect(port)?.with_chunk_size(6);
    let sent = client.send(&source.to_string_lossy())?;
    client.close();
    assert_eq!(sent, 12);

    let name = handle.join().expect("server thread panicked")?;
    assert_eq!(name.as_deref(), Some("notes.txt"));
    assert_eq!(std::fs::read(srv_dir.path().join("notes.txt"))?, b"hello\nworld\n");
    Ok(())
}

#[test]
fn archived_directory_is_stored_as_dated_iso() -> Result<()> {
    let srv_dir = tempfile::tempdir()?;
    let photos = tempfile::Builder::new().prefix("photos").tempdir()?;
    write_file(&photos.path().join("2024/beach.jpg"), 300_000)?;
    write_file(&photos.path().join("2024/sunset.jpg"), 70_000)?;
    write_file(&photos.path().join("index"), 100)?;

    let staging = tempfile::Builder::new().prefix("staging").tempdir()?;
    let archive = staging.path().join("photos-backup");
    let summary = TarArchiveBuilder::default().build(photos.path(), &archive)?;
    let blob = std::fs::read(&summary.path)?;

    let mut server = listening_server(srv_dir.path())?;
    let port = server.port();
    let handle = thread::spawn(move || -> Result<Option<String>> {
        server.accept_client()?;
        Ok(server.receive(8192)?)
    });

    let mut client = connect(port)?;
    let sent = client.send(&archive.to_string_lossy())?;
    client.close();
    assert_eq!(sent, blob.len() as u64);

    let expected = archive_output_name(Local::now().date_naive());
    let name = handle.join().expect("server thread panicked")?;
    assert_eq!(name.as_deref(), Some(expected.as_str()));
    let stored = std::fs::read(srv_dir.path().join(&expected))?;
    assert_eq!(stored, blob);

    // the .iso name carries the client's tar archive
    let mut names = Vec::new();
    for entry in tar::Archive::new(stored.as_slice()).entries()? {
        names.push(entry?.path()?.to_string_lossy().into_owned());
    }
    assert!(names.iter().any(|n| n == "index"), "{names:?}");
    Ok(())
}

#[test]
fn immediate_disconnect_yields_nothing() -> Result<()> {
    let srv_dir = tempfile::tempdir()?;
    let mut server = listening_server(srv_dir.path())?;
    let port = server.port();
    let handle = thread::spawn(move || -> Result<Option<String>> {
        server.accept_client()?;
        Ok(server.receive(1024)?)
    });

    drop(TcpStream::connect(("127.0.0.1", port))?);

    assert_eq!(handle.join().expect("server thread panicked")?, None);
    assert_eq!(std::fs::read_dir(srv_dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn chunk_boundaries_do_not_matter() -> Result<()> {
    let srv_dir = tempfile::tempdir()?;
    let payload = pattern(20_011);

    for (round, splits) in [vec![1usize, 7, 1000, 3], vec![20_011], vec![4096, 1]]
        .into_iter()
        .enumerate()
    {
        let mut server = listening_server(srv_dir.path())?;
        let port = server.port();
        let handle = thread::spawn(move || -> Result<Option<String>> {
            server.accept_client()?;
            Ok(server.receive(5)?)
        });

        let name = format!("round{round}.bin");
        let mut stream = TcpStream::connect(("127.0.0.1", port))?;
        write_frame(&mut stream, frame::HEADER, name.as_bytes())?;
        let mut rest = payload.as_slice();
        let mut i = 0;
        while !rest.is_empty() {
            let take = splits[i % splits.len()].min(rest.len());
            write_frame(&mut stream, frame::DATA, &rest[..take])?;
            rest = &rest[take..];
            i += 1;
        }
        write_frame(&mut stream, frame::DATA, &[])?;
        stream.flush()?;

        let got = handle.join().expect("server thread panicked")?;
        assert_eq!(got.as_deref(), Some(name.as_str()));
        assert_eq!(std::fs::read(srv_dir.path().join(&name))?, payload);
    }
    Ok(())
}

#[test]
fn server_is_reusable_after_end() -> Result<()> {
    let srv_dir = tempfile::tempdir()?;
    let cli_dir = tempfile::tempdir()?;
    let first = write_file(&cli_dir.path().join("first.bin"), 5_000)?;
    let second = write_file(&cli_dir.path().join("second.log"), 123)?;

    let mut server = listening_server(srv_dir.path())?;
    let port = server.port();
    let handle = thread::spawn(move || -> Result<Vec<String>> {
        let mut names = Vec::new();
        for _ in 0..2 {
            server.accept_client()?;
            names.extend(server.serve_session(1024)?);
            assert!(!server.has_session());
        }
        Ok(names)
    });

    for file in ["first.bin", "second.log"] {
        let mut client = connect(port)?;
        client.send(&cli_dir.path().join(file).to_string_lossy())?;
        client.close();
    }

    let names = handle.join().expect("server thread panicked")?;
    assert_eq!(names, vec!["first.bin".to_string(), "second.log".to_string()]);
    assert_eq!(std::fs::read(srv_dir.path().join("first.bin"))?, first);
    assert_eq!(std::fs::read(srv_dir.path().join("second.log"))?, second);
    Ok(())
}

#[test]
fn several_transfers_share_one_session() -> Result<()> {
    let srv_dir = tempfile::tempdir()?;
    let cli_dir = tempfile::tempdir()?;
    write_file(&cli_dir.path().join("a.txt"), 10)?;
    write_file(&cli_dir.path().join("b.txt"), 20)?;

    let mut server = listening_server(srv_dir.path())?;
    let port = server.port();
    let handle = thread::spawn(move || -> Result<Vec<String>> {
        server.accept_client()?;
        Ok(server.serve_session(64)?)
    });

    let mut client = connect(port)?;
    client.send(&cli_dir.path().join("a.txt").to_string_lossy())?;
    client.send(&cli_dir.path().join("b.txt").to_string_lossy())?;
    client.close();

    let names = handle.join().expect("server thread panicked")?;
    assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
    assert_eq!(std::fs::metadata(srv_dir.path().join("b.txt"))?.len(), 20);
    Ok(())
}

#[test]
fn busy_port_still_serves_on_substitute() -> Result<()> {
    let srv_dir = tempfile::tempdir()?;
    let squatter = std::net::TcpListener::bind("127.0.0.1:0")?;
    let busy = squatter.local_addr()?.port();

    let mut server = BackupServer::bind(Address::localhost(), busy)?.with_output_dir(srv_dir.path());
    assert!(server.endpoint().port_substituted());
    assert_ne!(server.port(), busy);
    server.listen(Some(1))?;
    let port = server.port();
    let handle = thread::spawn(move || -> Result<Option<String>> {
        server.accept_client()?;
        Ok(server.receive(512)?)
    });

    let cli_dir = tempfile::tempdir()?;
    write_file(&cli_dir.path().join("x.dat"), 777)?;
    let mut client = connect(port)?;
    client.send(&cli_dir.path().join("x.dat").to_string_lossy())?;
    client.close();

    assert_eq!(handle.join().expect("server thread panicked")?.as_deref(), Some("x.dat"));
    Ok(())
}

#[test]
fn truncated_transfer_is_reported_and_journaled() -> Result<()> {
    let srv_dir = tempfile::tempdir()?;
    let journal_dir = tempfile::tempdir()?;
    let journal = TransferLog::new(&journal_dir.path().join("journal.jsonl"));

    let mut server = BackupServer::bind(Address::localhost(), 0)?
        .with_output_dir(srv_dir.path())
        .with_journal(journal.clone());
    server.listen(None)?;
    let port = server.port();
    let handle = thread::spawn(move || -> Result<(Result<Option<String>, BackupError>, Result<Option<String>, BackupError>)> {
        server.accept_client()?;
        let first = server.receive(64);
        server.end();
        server.accept_client()?;
        let second = server.receive(64);
        Ok((first, second))
    });

    {
        let mut stream = TcpStream::connect(("127.0.0.1", port))?;
        write_frame(&mut stream, frame::HEADER, b"cut.bin")?;
        write_frame(&mut stream, frame::DATA, b"0123456789")?;
        stream.flush()?;
    }
    {
        let mut stream = TcpStream::connect(("127.0.0.1", port))?;
        write_frame(&mut stream, frame::HEADER, b"ok.bin")?;
        write_frame(&mut stream, frame::DATA, b"xyz")?;
        write_frame(&mut stream, frame::DATA, &[])?;
        stream.flush()?;
    }

    let (first, second) = handle.join().expect("server thread panicked")?;
    match first {
        Err(BackupError::TruncatedTransfer { bytes }) => assert_eq!(bytes, 10),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(second?.as_deref(), Some("ok.bin"));

    let entries = journal.read_log()?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].status, TransferStatus::Failed);
    assert_eq!(entries[0].header.as_deref(), Some("cut.bin"));
    assert_eq!(entries[0].bytes, 10);
    assert_eq!(entries[1].status, TransferStatus::Completed);
    assert_eq!(entries[1].bytes, 3);
    Ok(())
}

#[test]
fn directory_path_is_refused_before_any_frame() -> Result<()> {
    let srv_dir = tempfile::tempdir()?;
    let cli_dir = tempfile::tempdir()?;
    write_file(&cli_dir.path().join("inner.txt"), 42)?;

    let mut server = listening_server(srv_dir.path())?;
    let port = server.port();
    let handle = thread::spawn(move || -> Result<Option<String>> {
        server.accept_client()?;
        Ok(server.receive(1024)?)
    });

    let mut client = connect(port)?;
    match client.send(&cli_dir.path().to_string_lossy()) {
        Err(BackupError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::InvalidInput),
        other => panic!("unexpected {other:?}"),
    }
    client.close();

    assert_eq!(handle.join().expect("server thread panicked")?, None);
    assert_eq!(std::fs::read_dir(srv_dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn second_accept_replaces_unended_session() -> Result<()> {
    let srv_dir = tempfile::tempdir()?;
    let cli_dir = tempfile::tempdir()?;
    let data = write_file(&cli_dir.path().join("later.bin"), 2_048)?;

    let mut server = listening_server(srv_dir.path())?;
    let port = server.port();

    let mut first = TcpStream::connect(("127.0.0.1", port))?;
    let mut second = connect(port)?;

    let handle = thread::spawn(move || -> Result<Option<String>> {
        let first_peer = server.accept_client()?;
        let second_peer = server.accept_client()?;
        assert_ne!(first_peer, second_peer);
        assert_eq!(server.peer(), Some(second_peer.as_str()));
        Ok(server.receive(256)?)
    });

    second.send(&cli_dir.path().join("later.bin").to_string_lossy())?;
    second.close();

    assert_eq!(handle.join().expect("server thread panicked")?.as_deref(), Some("later.bin"));
    assert_eq!(std::fs::read(srv_dir.path().join("later.bin"))?, data);

    first.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 16];
    assert_eq!(first.read(&mut buf)?, 0);
    Ok(())
}
