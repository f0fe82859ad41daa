//! Create, append, read and tail against a log server.

use super::create::build_metadata;
use super::tail::start_recno;
use super::{print_records, CommandResult};
use gcl_core::{LogRecord, Name, Timestamp};
use gcl_server::{GclClient, ServerResult};
use std::future::Future;

/// Creates a log on the server.
pub fn create(addr: &str, name: &str, meta: &[String]) -> CommandResult {
    let metadata = build_metadata(meta, Timestamp::now())?;
    let identity = Name::parse(name);
    block_on(async {
        GclClient::connect(addr).await?.create(identity, &metadata).await
    })?;
    println!("Created log {name} on {addr}");
    println!("  identity: {}", identity.printable());
    println!("  metadata: {} entries", metadata.len());
    Ok(())
}

/// Appends one record per payload, printing each record number.
pub fn append(addr: &str, name: &str, records: &[String]) -> CommandResult {
    let recnos = block_on(append_all(addr, Name::parse(name), records))?;
    for recno in recnos {
        println!("{recno}");
    }
    Ok(())
}

/// Prints `count` records from `recno`; 0 reads to the end.
pub fn read(addr: &str, name: &str, recno: u64, count: u64, format: &str) -> CommandResult {
    let count = u32::try_from(count).map_err(|_| format!("count {count} is too large"))?;
    let records = block_on(async {
        GclClient::connect(addr)
            .await?
            .multiread(Name::parse(name), recno, count)
            .await
    })?;
    print_records(&records, format)
}

/// Prints the end of a log.
pub fn tail(addr: &str, name: &str, from: Option<u64>, lines: u64, format: &str) -> CommandResult {
    let records = block_on(tail_records(addr, Name::parse(name), from, lines))?;
    if records.is_empty() {
        println!("(empty log)");
        return Ok(());
    }
    print_records(&records, format)
}

async fn append_all(addr: &str, log: Name, records: &[String]) -> ServerResult<Vec<u64>> {
    let mut client = GclClient::connect(addr).await?;
    let mut recnos = Vec::with_capacity(records.len());
    for payload in records {
        recnos.push(client.append(log, payload.as_bytes()).await?);
    }
    Ok(recnos)
}

async fn tail_records(
    addr: &str,
    log: Name,
    from: Option<u64>,
    lines: u64,
) -> ServerResult<Vec<LogRecord>> {
    let mut client = GclClient::connect(addr).await?;
    let last = client.open(log, true).await?;
    if last == 0 {
        return Ok(Vec::new());
    }
    client.multiread(log, start_recno(last, from, lines), 0).await
}

fn block_on<T>(future: impl Future<Output = ServerResult<T>>) -> CommandResult<T> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcl_core::StoreConfig;
    use gcl_server::{GclServer, LogRegistry, MockTransport, ReplicationConfig, ServerConfig};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn spawn_server(runtime: &tokio::runtime::Runtime) -> (SocketAddr, Arc<GclServer>) {
        runtime.block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let config = ServerConfig::new(addr);
            let config = config
                .clone()
                .with_replication(ReplicationConfig::standalone(config.local_name, addr));
            let registry = Arc::new(LogRegistry::in_memory(StoreConfig::default()));
            let server = Arc::new(GclServer::with_parts(
                config,
                registry,
                Arc::new(MockTransport::new()),
            ));
            let serving = Arc::clone(&server);
            tokio::spawn(async move { serving.serve(listener).await });
            (addr, server)
        })
    }

    #[test]
    fn commands_reach_the_server() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (addr, server) = spawn_server(&runtime);
        let addr = addr.to_string();

        create(&addr, "remote", &["xid=remote".to_string()]).unwrap();
        assert!(create(&addr, "remote", &[]).is_err());
        append(&addr, "remote", &["one".into(), "two".into(), "three".into()]).unwrap();
        read(&addr, "remote", 1, 0, "json").unwrap();
        assert!(read(&addr, "remote", 9, 1, "text").is_err());

        let tail = block_on(tail_records(&addr, Name::parse("remote"), None, 2)).unwrap();
        let recnos: Vec<u64> = tail.iter().map(|r| r.recno).collect();
        assert_eq!(recnos, vec![2, 3]);

        let stored = server.registry().open(Name::parse("remote")).unwrap();
        assert_eq!(stored.store().read(1).unwrap().payload, b"one");

        assert!(append(&addr, "missing", &["x".into()]).is_err());
        server.shutdown();
    }
}
