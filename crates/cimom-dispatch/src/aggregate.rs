//! Per-request fan-out state: response collection, resequencing and merging.
//!
//! One `OperationAggregate` exists per in-flight client request that was
//! forwarded to more than zero providers. Provider callbacks deliver their
//! responses here from arbitrary threads; everything below runs under one
//! mutex per aggregate, so two callbacks can never interleave their "is this
//! the last chunk" decision and the client sees exactly one terminal response.
//!
//! Lifecycle: `AwaitingResponses` until the number of terminal (complete)
//! chunks equals the number of operations issued, then `Complete`. The
//! counters reset on completion so a pooled aggregate can be reused.

use cimom_error::CimStatusCode;
use cimom_types::{CimInstance, CimObjectPath};
use parking_lot::Mutex;
use tracing::warn;

use crate::message::{
    OperationContext, OperationRequest, OperationResponse, OperationResult, ResponsePayload,
};

/// Fan-out coordination state for one client request.
#[derive(Debug)]
pub struct OperationAggregate {
    context: OperationContext,
    request: OperationRequest,
    /// Host name stamped onto returned paths that arrive without one.
    local_host: String,
    /// Number of provider operations issued for this request.
    total_issued: u64,
    inner: Mutex<AggregateInner>,
}

#[derive(Debug, Default)]
struct AggregateInner {
    responses: Vec<OperationResponse>,
    /// Responses seen in the current cycle.
    total_received: u64,
    /// Terminal chunks seen in the current cycle.
    total_received_complete: u64,
    /// Chunk count implied by the indices of terminal chunks.
    total_received_expected: u64,
    errors: u64,
    not_supported: u64,
}

impl AggregateInner {
    fn reset_counters(&mut self) {
        self.total_received = 0;
        self.total_received_complete = 0;
        self.total_received_expected = 0;
        self.errors = 0;
        self.not_supported = 0;
    }
}

impl OperationAggregate {
    #[must_use]
    pub fn new(
        context: OperationContext,
        request: OperationRequest,
        local_host: impl Into<String>,
        total_issued: u64,
    ) -> Self {
        Self {
            context,
            request,
            local_host: local_host.into(),
            total_issued,
            inner: Mutex::new(AggregateInner::default()),
        }
    }

    #[must_use]
    pub fn context(&self) -> &OperationContext {
        &self.context
    }

    #[must_use]
    pub fn request(&self) -> &OperationRequest {
        &self.request
    }

    #[must_use]
    pub fn total_issued(&self) -> u64 {
        self.total_issued
    }

    /// Append a provider response to the collection list.
    ///
    /// Returns whether the number of appended responses now equals the number
    /// issued. This is a readiness heuristic for call sites that collect whole
    /// responses before merging; the authoritative completion decision is
    /// [`Self::resequence_response`].
    pub fn append_response(&self, response: OperationResponse) -> bool {
        let mut inner = self.inner.lock();
        inner.responses.push(response);
        inner.responses.len() as u64 == self.total_issued
    }

    /// Number of responses collected so far.
    #[must_use]
    pub fn response_count(&self) -> usize {
        self.inner.lock().responses.len()
    }

    /// Resequence one provider response chunk.
    ///
    /// Assigns the aggregate-wide sequence index, maintains the completion
    /// counters, applies the not-supported suppression policy on the terminal
    /// chunk and decides completion. Returns `true` exactly once per cycle,
    /// for the chunk that completes the aggregate; that chunk leaves with
    /// `complete = true`, every other chunk leaves with `complete = false`.
    pub fn resequence_response(&self, response: &mut OperationResponse) -> bool {
        let mut inner = self.inner.lock();

        if response.complete {
            inner.total_received_complete += 1;
            inner.total_received_expected += response.index + 1;
        }
        if let Some(code) = response.result.error_code() {
            inner.errors += 1;
            if code == CimStatusCode::NotSupported {
                inner.not_supported += 1;
            }
        }
        response.index = inner.total_received;
        inner.total_received += 1;

        let done = inner.total_received_complete == self.total_issued;
        if done {
            // A lone provider declining support must not mask results from
            // the ones that answered; only a unanimous decline surfaces it.
            if inner.not_supported != inner.total_received && response.is_not_supported() {
                response.result = OperationResult::Ok {
                    payload: empty_payload_for(&self.request),
                };
            }
            if inner.total_received_expected != inner.total_received {
                warn!(
                    message_id = self.context.message_id,
                    op = self.request.op_name(),
                    expected = inner.total_received_expected,
                    received = inner.total_received,
                    "response chunk accounting mismatch, forwarding anyway"
                );
            }
            response.complete = true;
            inner.reset_counters();
        } else {
            response.complete = false;
        }
        done
    }

    /// Merge the collected responses into one.
    ///
    /// Payload lists of responses 2..n are concatenated onto the first in
    /// list order; the emptied responses are discarded. Error policy matches
    /// the resequencer: unanimous not-supported surfaces not-supported, a
    /// minority not-supported is dropped, any other error wins over partial
    /// results. Every returned instance/path then gets empty host/namespace
    /// fields filled from the local host and the request namespace.
    ///
    /// Returns `None` when nothing was collected.
    pub fn merge_responses(&self) -> Option<OperationResponse> {
        let mut responses = std::mem::take(&mut self.inner.lock().responses);
        if responses.is_empty() {
            return None;
        }

        let all_not_supported = responses.iter().all(OperationResponse::is_not_supported);
        if all_not_supported {
            let mut first = responses.swap_remove(0);
            first.complete = true;
            return Some(first);
        }
        responses.retain(|r| !r.is_not_supported());

        // Any remaining error consolidates the whole request to that status.
        if let Some(pos) = responses.iter().position(OperationResponse::is_error) {
            let mut err = responses.swap_remove(pos);
            err.complete = true;
            return Some(err);
        }

        let mut merged = responses.remove(0);
        for r in responses {
            if let (OperationResult::Ok { payload: base }, OperationResult::Ok { payload: more }) =
                (&mut merged.result, r.result)
            {
                concat_payload(base, more);
            }
        }
        if let OperationResult::Ok { payload } = &mut merged.result {
            self.qualify_payload(payload);
        }
        merged.complete = true;
        Some(merged)
    }

    fn qualify_payload(&self, payload: &mut ResponsePayload) {
        let fill_path = |p: &mut CimObjectPath| {
            if p.host.is_empty() {
                p.host = self.local_host.clone();
            }
            if p.namespace.is_empty() {
                p.namespace = self.context.namespace.clone();
            }
        };
        let fill_instance = |inst: &mut CimInstance| {
            if inst.namespace.is_empty() {
                inst.namespace = self.context.namespace.clone();
            }
            if let Some(p) = &mut inst.path {
                fill_path(p);
            }
        };
        match payload {
            ResponsePayload::Instance { instance } => fill_instance(instance),
            ResponsePayload::Instances { instances } | ResponsePayload::Objects { objects: instances } => {
                instances.iter_mut().for_each(fill_instance);
            }
            ResponsePayload::Path { path } => fill_path(path),
            ResponsePayload::Paths { paths } => paths.iter_mut().for_each(fill_path),
            _ => {}
        }
    }
}

/// Concatenate `more` onto `base` when both carry the same list shape.
///
/// Mismatched shapes drop `more`; providers answering a fan-out all answer
/// the same operation, so a mismatch means a misbehaving provider.
fn concat_payload(base: &mut ResponsePayload, more: ResponsePayload) {
    match (base, more) {
        (
            ResponsePayload::Instances { instances: a },
            ResponsePayload::Instances { instances: b },
        )
        | (ResponsePayload::Objects { objects: a }, ResponsePayload::Objects { objects: b }) => {
            a.extend(b);
        }
        (ResponsePayload::Paths { paths: a }, ResponsePayload::Paths { paths: b }) => {
            a.extend(b);
        }
        (ResponsePayload::Classes { classes: a }, ResponsePayload::Classes { classes: b }) => {
            a.extend(b);
        }
        (
            ResponsePayload::Qualifiers { qualifiers: a },
            ResponsePayload::Qualifiers { qualifiers: b },
        ) => {
            a.extend(b);
        }
        (base, more) => {
            warn!(
                base = ?std::mem::discriminant(&*base),
                more = ?std::mem::discriminant(&more),
                "dropping fan-out payload with mismatched shape"
            );
        }
    }
}

/// The neutral success payload for a request whose lone not-supported error
/// was suppressed.
fn empty_payload_for(request: &OperationRequest) -> ResponsePayload {
    match request {
        OperationRequest::EnumerateInstances { .. } => ResponsePayload::Instances {
            instances: Vec::new(),
        },
        OperationRequest::EnumerateInstanceNames { .. }
        | OperationRequest::AssociatorNames { .. }
        | OperationRequest::ReferenceNames { .. } => ResponsePayload::Paths { paths: Vec::new() },
        OperationRequest::Associators { .. } | OperationRequest::References { .. } => {
            ResponsePayload::Objects {
                objects: Vec::new(),
            }
        }
        OperationRequest::EnumerateClasses { .. } => ResponsePayload::Classes {
            classes: Vec::new(),
        },
        OperationRequest::EnumerateQualifiers => ResponsePayload::Qualifiers {
            qualifiers: Vec::new(),
        },
        _ => ResponsePayload::Done,
    }
}

#[cfg(test)]
mod tests {
    use cimom_types::{CimName, KeyBindingValue};
    use proptest::prelude::*;

    use super::*;

    fn enumerate_request() -> OperationRequest {
        OperationRequest::EnumerateInstances {
            class_name: CimName::new("Acme_Disk"),
            deep_inheritance: true,
            property_list: None,
        }
    }

    fn aggregate(issued: u64) -> OperationAggregate {
        OperationAggregate::new(
            OperationContext::new(9, "root/acme"),
            enumerate_request(),
            "host.example.org",
            issued,
        )
    }

    fn path_response(ctx: &OperationContext, names: &[&str]) -> OperationResponse {
        OperationResponse::ok(
            ctx,
            ResponsePayload::Paths {
                paths: names
                    .iter()
                    .map(|n| {
                        let mut p = CimObjectPath::with_class("Acme_Disk");
                        p.push_key("Id", KeyBindingValue::String((*n).into()));
                        p
                    })
                    .collect(),
            },
        )
    }

    #[test]
    fn five_arbitrary_order_completions_produce_one_terminal_response() {
        let agg = aggregate(5);
        let ctx = agg.context().clone();
        // Arbitrary completion order of five single-chunk providers.
        let order = [3usize, 0, 4, 1, 2];
        let mut completions = 0;
        for (seq, provider) in order.into_iter().enumerate() {
            let mut r = path_response(&ctx, &[&format!("d{provider}")]);
            let done = agg.resequence_response(&mut r);
            // Sequence index reflects arrival order, not provider identity.
            assert_eq!(r.index, seq as u64);
            assert_eq!(done, seq == 4, "premature completion at {seq}");
            assert_eq!(r.complete, done);
            if done {
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
    }

    #[test]
    fn counters_reset_for_reuse_after_completion() {
        let agg = aggregate(2);
        let ctx = agg.context().clone();
        for cycle in 0..3 {
            let mut a = path_response(&ctx, &["x"]);
            assert!(!agg.resequence_response(&mut a), "cycle {cycle}");
            let mut b = path_response(&ctx, &["y"]);
            assert!(agg.resequence_response(&mut b), "cycle {cycle}");
            assert_eq!(a.index, 0);
            assert_eq!(b.index, 1);
        }
    }

    #[test]
    fn minority_not_supported_is_suppressed() {
        let agg = aggregate(3);
        let ctx = agg.context().clone();
        let mut r1 = OperationResponse::error(&ctx, CimStatusCode::NotSupported, "no");
        let mut r2 = path_response(&ctx, &["d0"]);
        let mut r3 = OperationResponse::error(&ctx, CimStatusCode::NotSupported, "no");
        assert!(!agg.resequence_response(&mut r1));
        assert!(!agg.resequence_response(&mut r2));
        // The terminal chunk happens to be a decline; it must be cleared.
        assert!(agg.resequence_response(&mut r3));
        assert!(!r3.is_error());
        assert!(r3.complete);
    }

    #[test]
    fn unanimous_not_supported_surfaces_not_supported() {
        let agg = aggregate(3);
        let ctx = agg.context().clone();
        for i in 0..3 {
            let mut r = OperationResponse::error(&ctx, CimStatusCode::NotSupported, "no");
            let done = agg.resequence_response(&mut r);
            assert_eq!(done, i == 2);
            if done {
                assert_eq!(
                    r.result.error_code(),
                    Some(CimStatusCode::NotSupported)
                );
            }
        }
    }

    #[test]
    fn merge_concatenates_in_list_order_and_qualifies_paths() {
        let agg = aggregate(3);
        let ctx = agg.context().clone();
        assert!(!agg.append_response(path_response(&ctx, &["d0", "d1"])));
        assert!(!agg.append_response(path_response(&ctx, &["d2"])));
        assert!(agg.append_response(path_response(&ctx, &["d3"])));

        let merged = agg.merge_responses().unwrap();
        match merged.result {
            OperationResult::Ok {
                payload: ResponsePayload::Paths { paths },
            } => {
                let ids: Vec<String> = paths
                    .iter()
                    .map(|p| match &p.key_binding("Id").unwrap().value {
                        KeyBindingValue::String(s) => s.clone(),
                        other => panic!("unexpected: {other:?}"),
                    })
                    .collect();
                assert_eq!(ids, vec!["d0", "d1", "d2", "d3"]);
                for p in &paths {
                    assert_eq!(p.host, "host.example.org");
                    assert_eq!(p.namespace.as_str(), "root/acme");
                }
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn merge_error_policy_matches_the_resequencer() {
        // Two declines plus one success merge to success.
        let agg = aggregate(3);
        let ctx = agg.context().clone();
        agg.append_response(OperationResponse::error(&ctx, CimStatusCode::NotSupported, "no"));
        agg.append_response(path_response(&ctx, &["d0"]));
        agg.append_response(OperationResponse::error(&ctx, CimStatusCode::NotSupported, "no"));
        let merged = agg.merge_responses().unwrap();
        assert!(!merged.is_error());

        // Three declines merge to not-supported.
        let agg = aggregate(3);
        for _ in 0..3 {
            agg.append_response(OperationResponse::error(&ctx, CimStatusCode::NotSupported, "no"));
        }
        let merged = agg.merge_responses().unwrap();
        assert_eq!(merged.result.error_code(), Some(CimStatusCode::NotSupported));

        // A different error wins over partial results.
        let agg = aggregate(2);
        agg.append_response(path_response(&ctx, &["d0"]));
        agg.append_response(OperationResponse::error(&ctx, CimStatusCode::AccessDenied, "denied"));
        let merged = agg.merge_responses().unwrap();
        assert_eq!(merged.result.error_code(), Some(CimStatusCode::AccessDenied));
    }

    proptest::proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        /// Whatever order single-chunk providers finish in, sequence indices
        /// follow arrival order and exactly the last chunk completes.
        #[test]
        fn prop_any_arrival_order_completes_exactly_once(
            order in (1usize..=8)
                .prop_flat_map(|n| Just((0..n).collect::<Vec<usize>>()).prop_shuffle())
        ) {
            let n = order.len();
            let agg = aggregate(n as u64);
            let ctx = agg.context().clone();
            let mut completions = 0;
            for (seq, provider) in order.iter().enumerate() {
                let mut r = path_response(&ctx, &[&format!("d{provider}")]);
                let done = agg.resequence_response(&mut r);
                prop_assert_eq!(r.index, seq as u64);
                prop_assert_eq!(done, seq == n - 1);
                prop_assert_eq!(r.complete, done);
                if done {
                    completions += 1;
                }
            }
            prop_assert_eq!(completions, 1);
        }
    }
}
