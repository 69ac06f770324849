// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 tslock contributors
//
// Operator tool for inspecting and recovering locks in a table store.
//
// Usage:
//   tslock_admin <store> keys
//   tslock_admin <store> status [key]
//   tslock_admin <store> recover [key]
//   tslock_admin <store> force-unlock <pid> [key]
//
// <key> defaults to the write lock. `recover` only reclaims a lock whose
// holder is no longer running; `force-unlock` swaps out <pid> without any
// liveness check. Set RUST_LOG=tslock=debug to see every diagnostic record.

use std::process::ExitCode;
use std::sync::Arc;

use tslock::{
    AdaptivePauser, Interrupt, LockCell, LockConfig, OsProcessOracle, ProcessOracle, QueueLock,
    Recovery, TableStore, UNLOCKED, WRITE_LOCK_KEY,
};

fn usage() -> ExitCode {
    eprintln!("usage: tslock_admin <store> keys|status [key]|recover [key]|force-unlock <pid> [key]");
    ExitCode::from(2)
}

fn open_lock(store: &Arc<TableStore>, key: &str) -> tslock::Result<QueueLock<TableStore>> {
    QueueLock::create(
        key,
        Arc::clone(store),
        AdaptivePauser::new,
        LockConfig::from_env(),
    )
}

fn run(args: &[String]) -> tslock::Result<ExitCode> {
    let store = Arc::new(TableStore::open(&args[0])?);
    let key_at = |i: usize| args.get(i).map(String::as_str).unwrap_or(WRITE_LOCK_KEY);

    match args[1].as_str() {
        "keys" => {
            for key in store.keys() {
                let value = store.acquire_value_for(&key)?;
                println!("{key}\t{}", describe(value.get_value()));
                if let Err(e) = value.close() {
                    log::warn!("failed to release key={key}: {e}");
                }
            }
        }
        "status" => {
            let lock = open_lock(&store, key_at(2))?;
            println!("{}\t{}", lock.lock_key(), describe(lock.lock_value()?));
        }
        "recover" => {
            let lock = open_lock(&store, key_at(2))?;
            let interrupt = Interrupt::new();
            match lock.force_unlock_if_process_is_dead(&interrupt)? {
                Recovery::Free => println!("{}: not locked", lock.lock_key()),
                Recovery::HeldByLiveProcess(pid) => {
                    println!("{}: held by running process {pid}, left alone", lock.lock_key());
                    return Ok(ExitCode::from(1));
                }
                Recovery::Reclaimed(pid) => {
                    println!("{}: reclaimed from dead process {pid}", lock.lock_key())
                }
            }
        }
        "force-unlock" => {
            let Some(pid) = args.get(2).and_then(|s| s.parse::<i64>().ok()) else {
                return Ok(usage());
            };
            let lock = open_lock(&store, key_at(3))?;
            if lock.force_unlock(pid)? {
                println!("{}: unlocked (was pid {pid})", lock.lock_key());
            } else {
                println!(
                    "{}: not unlocked, current holder is {}",
                    lock.lock_key(),
                    describe(lock.lock_value()?)
                );
                return Ok(ExitCode::from(1));
            }
        }
        _ => return Ok(usage()),
    }
    store.flush()?;
    Ok(ExitCode::SUCCESS)
}

fn describe(value: i64) -> String {
    if value == UNLOCKED {
        return "unlocked".to_owned();
    }
    let state = if OsProcessOracle.is_process_alive(value) {
        "running"
    } else {
        "dead"
    };
    format!("held by pid {value} ({state})")
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        return usage();
    }
    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e}");
            eprintln!("tslock_admin: {e}");
            ExitCode::FAILURE
        }
    }
}
