//! Bridges the host's push-based value observation into synchronous,
//! timeout-bounded reads.
//!
//! The host signals computed values through subscription callbacks at
//! arbitrary future points. One-shot reads ([`eval_once`], [`await_capture`])
//! resolve on the first notification and unsubscribe immediately; persistent
//! observations use [`ValueStream`] (every change, in order) or [`LiveValue`]
//! (latest value, with a first-value join for the bootstrap barrier).

use std::{
    sync::{
        Arc, Condvar, Mutex,
        mpsc::{self, Receiver, RecvTimeoutError},
    },
    time::{Duration, Instant},
};

use crate::{
    error::{PlotrecError, PlotrecResult},
    host::{CalculatorHost, CaptureRequest, ObserverHandle, Screenshot},
    settings::CancelToken,
};

/// Poll granularity for honoring cancellation while blocked on a channel.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Wrap a helper expression with a neutral arithmetic identity.
///
/// Some literal numeric expressions never trigger computation through the
/// host's helper-evaluation path unless perturbed. Applying the identity
/// uniformly makes constant and computed expressions evaluate alike.
pub fn normalize_helper_expr(expr: &str) -> String {
    format!("({expr})+0")
}

/// Evaluate a symbolic expression once: subscribe, take the first computed
/// value, unsubscribe. Non-finite results are rejected as evaluation errors.
pub fn eval_once(
    host: &dyn CalculatorHost,
    expr: &str,
    timeout: Duration,
    cancel: &CancelToken,
) -> PlotrecResult<f64> {
    let (tx, rx) = mpsc::sync_channel::<f64>(1);
    let handle = host.observe(
        &normalize_helper_expr(expr),
        Box::new(move |v| {
            // Only the first notification matters; later ones are dropped.
            let _ = tx.try_send(v);
        }),
    )?;

    let value = recv_bounded(&rx, timeout, cancel, || {
        format!("expression '{expr}' produced no value")
    });
    handle.unsubscribe();
    let value = value?;

    if !value.is_finite() {
        return Err(PlotrecError::evaluation(format!(
            "expression '{expr}' computed a non-finite value ({value})"
        )));
    }
    Ok(value)
}

/// Bridge a callback-style capture into a synchronous timeout-bounded result.
pub fn await_capture(
    host: &dyn CalculatorHost,
    request: &CaptureRequest,
    timeout: Duration,
    cancel: &CancelToken,
) -> PlotrecResult<Screenshot> {
    let (tx, rx) = mpsc::sync_channel::<PlotrecResult<Screenshot>>(1);
    host.capture(
        request,
        Box::new(move |result| {
            let _ = tx.try_send(result);
        }),
    )?;

    recv_bounded(&rx, timeout, cancel, || {
        format!(
            "host produced no {}x{} still image",
            request.width, request.height
        )
    })?
}

/// Persistent subscription delivering every observed value change, in order.
pub struct ValueStream {
    rx: Receiver<f64>,
    _handle: ObserverHandle,
}

impl ValueStream {
    pub fn subscribe(host: &dyn CalculatorHost, expr: &str) -> PlotrecResult<Self> {
        let (tx, rx) = mpsc::channel::<f64>();
        let handle = host.observe(
            &normalize_helper_expr(expr),
            Box::new(move |v| {
                let _ = tx.send(v);
            }),
        )?;
        Ok(Self {
            rx,
            _handle: handle,
        })
    }

    /// Next value, waiting at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration, cancel: &CancelToken) -> PlotrecResult<f64> {
        recv_bounded(&self.rx, timeout, cancel, || {
            "observed expression produced no value".to_string()
        })
    }

    pub fn try_recv(&self) -> Option<f64> {
        self.rx.try_recv().ok()
    }

    /// Discard all buffered values, returning how many were dropped.
    pub fn drain(&self) -> usize {
        let mut n = 0;
        while self.rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }
}

/// Persistent subscription caching the latest observed value.
pub struct LiveValue {
    shared: Arc<(Mutex<Option<f64>>, Condvar)>,
    _handle: ObserverHandle,
}

impl LiveValue {
    pub fn subscribe(host: &dyn CalculatorHost, expr: &str) -> PlotrecResult<Self> {
        let shared = Arc::new((Mutex::new(None::<f64>), Condvar::new()));
        let writer = Arc::clone(&shared);
        let handle = host.observe(
            &normalize_helper_expr(expr),
            Box::new(move |v| {
                let (lock, cvar) = &*writer;
                *lock.lock().expect("live value lock poisoned") = Some(v);
                cvar.notify_all();
            }),
        )?;
        Ok(Self {
            shared,
            _handle: handle,
        })
    }

    /// Latest observed value, if the binding has produced one yet.
    pub fn get(&self) -> Option<f64> {
        *self.shared.0.lock().expect("live value lock poisoned")
    }

    /// Block until the binding has produced its first value.
    pub fn wait_first(&self, timeout: Duration, cancel: &CancelToken) -> PlotrecResult<f64> {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.shared;
        let mut guard = lock.lock().expect("live value lock poisoned");
        loop {
            if let Some(v) = *guard {
                return Ok(v);
            }
            cancel.check("waiting for first observed value")?;
            let now = Instant::now();
            if now >= deadline {
                return Err(PlotrecError::timeout(
                    "binding produced no initial value within the deadline",
                ));
            }
            let wait = CANCEL_POLL.min(deadline - now);
            let (g, _) = cvar
                .wait_timeout(guard, wait)
                .expect("live value lock poisoned");
            guard = g;
        }
    }
}

fn recv_bounded<T>(
    rx: &Receiver<T>,
    timeout: Duration,
    cancel: &CancelToken,
    describe: impl Fn() -> String,
) -> PlotrecResult<T> {
    let deadline = Instant::now() + timeout;
    loop {
        cancel.check("waiting for an observed value")?;
        let now = Instant::now();
        if now >= deadline {
            return Err(PlotrecError::timeout(format!(
                "{} within {:?}",
                describe(),
                timeout
            )));
        }
        match rx.recv_timeout(CANCEL_POLL.min(deadline - now)) {
            Ok(v) => return Ok(v),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(PlotrecError::evaluation(format!(
                    "observation ended before {}",
                    describe()
                )));
            }
        }
    }
}
