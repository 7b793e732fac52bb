//! One-time, idempotent session setup: ensure the managed bindings exist,
//! group them under one UI folder, and bring the long-lived corner
//! observations live before handing out the [`Session`].

use std::sync::Arc;

use crate::{
    error::{PlotrecError, PlotrecResult},
    host::{CalculatorHost, ExpressionDef, FolderDef, SliderBounds},
    observe::LiveValue,
    session::{BindingIds, CornerValues, Session},
    settings::{CancelToken, Timeouts},
};

const FOLDER_TITLE: &str = "plot recorder";

/// Ensure the viewport corners, time parameter, and animate trigger exist
/// exactly once, then return live handles to them.
///
/// Idempotent across repeated runs: bindings are detected by identifier
/// before creation, and an existing binding's value and declared range are
/// never overwritten, only its folder placement. A pre-existing binding with
/// the expected identifier but no numeric value is rejected as a
/// [`PlotrecError::Bootstrap`] configuration error.
///
/// Returns only once all four corner bindings have produced an initial value
/// (join barrier, bounded by `timeouts.eval`).
#[tracing::instrument(skip(host, timeouts, cancel))]
pub fn bootstrap(
    host: Arc<dyn CalculatorHost>,
    ids: BindingIds,
    timeouts: &Timeouts,
    cancel: &CancelToken,
) -> PlotrecResult<Session> {
    ensure_folder(host.as_ref(), &ids.folder)?;

    for def in default_bindings(&ids) {
        ensure_binding(host.as_ref(), &def)?;
    }
    adopt_into_folder(host.as_ref(), &ids)?;

    let corners = CornerValues {
        x1: LiveValue::subscribe(host.as_ref(), &ids.x1)?,
        x2: LiveValue::subscribe(host.as_ref(), &ids.x2)?,
        y1: LiveValue::subscribe(host.as_ref(), &ids.y1)?,
        y2: LiveValue::subscribe(host.as_ref(), &ids.y2)?,
    };
    for (live, id) in [
        (&corners.x1, &ids.x1),
        (&corners.x2, &ids.x2),
        (&corners.y1, &ids.y1),
        (&corners.y2, &ids.y2),
    ] {
        live.wait_first(timeouts.eval, cancel).map_err(|e| match e {
            PlotrecError::Timeout(_) => PlotrecError::bootstrap(format!(
                "corner binding '{id}' produced no initial value within {:?}",
                timeouts.eval
            )),
            other => other,
        })?;
    }

    tracing::debug!("session bootstrap complete");
    Ok(Session::new(host, ids, corners))
}

fn default_bindings(ids: &BindingIds) -> Vec<ExpressionDef> {
    let scalar = |id: &str, v: f64| ExpressionDef {
        id: id.to_string(),
        expr: format!("{id}={v}"),
        value: Some(v),
        slider_bounds: None,
        hidden: false,
        folder_id: Some(ids.folder.clone()),
    };

    vec![
        scalar(&ids.x1, -10.0),
        scalar(&ids.y1, -6.0),
        scalar(&ids.x2, 10.0),
        scalar(&ids.y2, 6.0),
        ExpressionDef {
            id: ids.time.clone(),
            expr: format!("{}=0", ids.time),
            value: Some(0.0),
            // Symbolic endpoints, resolved through the observer bridge each
            // run rather than read as literals.
            slider_bounds: Some(SliderBounds {
                min: "0".to_string(),
                max: "1".to_string(),
            }),
            hidden: false,
            folder_id: Some(ids.folder.clone()),
        },
        scalar(&ids.trigger, 0.0),
    ]
}

fn ensure_folder(host: &dyn CalculatorHost, folder_id: &str) -> PlotrecResult<()> {
    if host.folder(folder_id)?.is_none() {
        host.set_folder(&FolderDef {
            id: folder_id.to_string(),
            title: FOLDER_TITLE.to_string(),
            collapsed: true,
            hidden: false,
        })?;
    }
    Ok(())
}

fn ensure_binding(host: &dyn CalculatorHost, default: &ExpressionDef) -> PlotrecResult<()> {
    match host.expression(&default.id)? {
        Some(existing) => {
            if existing.value.is_none() {
                return Err(PlotrecError::bootstrap(format!(
                    "binding '{}' already exists but has no numeric value",
                    default.id
                )));
            }
            if default.slider_bounds.is_some() && existing.slider_bounds.is_none() {
                return Err(PlotrecError::bootstrap(format!(
                    "binding '{}' already exists but declares no range",
                    default.id
                )));
            }
            Ok(())
        }
        None => host.set_expression(default),
    }
}

/// One bulk state pass assigning folder membership to every managed binding.
/// Only organizational placement changes; values are untouched.
fn adopt_into_folder(host: &dyn CalculatorHost, ids: &BindingIds) -> PlotrecResult<()> {
    let managed = [
        ids.x1.as_str(),
        ids.x2.as_str(),
        ids.y1.as_str(),
        ids.y2.as_str(),
        ids.time.as_str(),
        ids.trigger.as_str(),
    ];

    let mut state = host.session_state()?;
    let mut changed = false;
    for expr in &mut state.expressions {
        if managed.contains(&expr.id.as_str()) && expr.folder_id.as_deref() != Some(&ids.folder) {
            expr.folder_id = Some(ids.folder.clone());
            changed = true;
        }
    }
    if changed {
        host.set_session_state(&state)?;
    }
    Ok(())
}
