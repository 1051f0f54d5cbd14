//! Dispatch worker threads for hosted builds

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::channel::Channel;

/// Receive-dispatch and send-dispatch threads of one channel
pub struct Workers {
    channel: Arc<Channel>,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Start both dispatch threads for `channel`
    pub fn spawn(channel: Arc<Channel>) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut workers = Self {
            channel: channel.clone(),
            stop: stop.clone(),
            threads: Vec::with_capacity(2),
        };

        let rx_channel = channel.clone();
        let rx_stop = stop.clone();
        workers.threads.push(
            thread::Builder::new()
                .name(format!("ipc-rx-{}", channel.id()))
                .spawn(move || {
                    while !rx_stop.load(Ordering::Acquire) {
                        rx_channel.run_dispatch();
                        if rx_stop.load(Ordering::Acquire) {
                            break;
                        }
                        rx_channel.wait_for_work();
                    }
                    log::debug!("receive dispatch for channel {} stopped", rx_channel.id());
                })?,
        );

        let tx_channel = channel.clone();
        let tx_stop = stop;
        workers.threads.push(
            thread::Builder::new()
                .name(format!("ipc-tx-{}", channel.id()))
                .spawn(move || {
                    while !tx_stop.load(Ordering::Acquire) {
                        tx_channel.run_send_dispatch();
                        if tx_stop.load(Ordering::Acquire) {
                            break;
                        }
                        tx_channel.wait_for_send_work();
                    }
                    log::debug!("send dispatch for channel {} stopped", tx_channel.id());
                })?,
        );

        Ok(workers)
    }

    /// Stop both threads and wait for them to exit
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.channel.wake_workers();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("dispatch worker for channel {} panicked", self.channel.id());
            }
        }
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.halt();
        }
    }
}
