//! Control Flow
//!
//! Conditions, loops, variable updates and `split_list`. Nested bodies run
//! sequentially on the caller's context through [`Dispatcher::run_steps`].
//! A `goto` in a body ends the body, and any loop around it, and is handed
//! up to the program counter.

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use serde_json::{Map, Value};

use crate::context::{evaluate, render, resolve, Context};
use crate::workflow::{GroupShare, Step};

use super::dispatch::{Dispatcher, Scope, StepError, StepOutcome};

impl Dispatcher {
    /// Runs a body in order, stopping at the first jump.
    ///
    /// Failures stay inside each step and are only reflected in the
    /// returned outcome.
    pub fn run_steps(&self, steps: &[Step], ctx: &Context, scope: Scope) -> StepOutcome {
        let mut outcome = StepOutcome::next();
        for step in steps {
            outcome = outcome.then(self.dispatch(step, ctx, scope));
            if outcome.is_jump() {
                break;
            }
        }
        outcome
    }

    /// Resolves and evaluates a condition string.
    fn check(&self, condition: &str, ctx: &Context) -> Result<bool, StepError> {
        let resolved = render(condition, ctx)?;
        let result = evaluate(&resolved, ctx).map_err(|source| StepError::Expression {
            condition: resolved.clone(),
            source,
        })?;
        debug!("Condition '{}' evaluated to {}", resolved, result);
        Ok(result)
    }

    pub(crate) fn run_condition(
        &self,
        condition: &str,
        then: &[Step],
        otherwise: &[Step],
        ctx: &Context,
        scope: Scope,
    ) -> Result<StepOutcome, StepError> {
        if self.check(condition, ctx)? {
            info!("Condition '{}' is true", condition);
            Ok(self.run_steps(then, ctx, scope))
        } else {
            info!("Condition '{}' is false", condition);
            Ok(self.run_steps(otherwise, ctx, scope))
        }
    }

    /// Counts from `start` towards `end` (exclusive) by `increment`.
    ///
    /// A negative increment counts down. A zero increment never terminates
    /// when `start < end`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn run_for_loop(
        &self,
        variable: &str,
        start: &Value,
        end: &Value,
        increment: &Value,
        steps: &[Step],
        ctx: &Context,
        scope: Scope,
    ) -> Result<StepOutcome, StepError> {
        let start = resolve_integer(start, "start", ctx)?;
        let end = resolve_integer(end, "end", ctx)?;
        let increment = resolve_integer(increment, "increment", ctx)?;

        info!(
            "Starting for loop: {} from {} to {} by {}",
            variable, start, end, increment
        );

        let mut outcome = StepOutcome::next();
        let mut i = start;
        loop {
            let in_range = if increment >= 0 { i < end } else { i > end };
            if !in_range {
                break;
            }
            ctx.set(variable, i);
            outcome = outcome.then(self.run_steps(steps, ctx, scope));
            if outcome.is_jump() {
                info!("Leaving for loop over {} at {}", variable, i);
                break;
            }

            i = match i.checked_add(increment) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(outcome)
    }

    pub(crate) fn run_while_loop(
        &self,
        condition: &str,
        steps: &[Step],
        ctx: &Context,
        scope: Scope,
    ) -> Result<StepOutcome, StepError> {
        let mut outcome = StepOutcome::next();
        let mut iterations = 0usize;
        while self.check(condition, ctx)? {
            outcome = outcome.then(self.run_steps(steps, ctx, scope));
            iterations += 1;
            if outcome.is_jump() {
                break;
            }
        }
        info!("While loop finished after {} iteration(s)", iterations);
        Ok(outcome)
    }

    pub(crate) fn run_do_while_loop(
        &self,
        condition: &str,
        steps: &[Step],
        ctx: &Context,
        scope: Scope,
    ) -> Result<StepOutcome, StepError> {
        let mut outcome = StepOutcome::next();
        let mut iterations = 0usize;
        loop {
            outcome = outcome.then(self.run_steps(steps, ctx, scope));
            iterations += 1;
            if outcome.is_jump() || !self.check(condition, ctx)? {
                break;
            }
        }
        info!("Do-while loop finished after {} iteration(s)", iterations);
        Ok(outcome)
    }

    pub(crate) fn set_variable(
        &self,
        variable: &str,
        value: &Value,
        ctx: &Context,
    ) -> Result<(), StepError> {
        let value = resolve(value, ctx)?;
        info!("Setting variable {} to {}", variable, value);
        ctx.set(variable, value);
        Ok(())
    }

    /// Adds `amount` to an integer variable under the context lock.
    pub(crate) fn increment_variable(
        &self,
        variable: &str,
        amount: &Value,
        ctx: &Context,
    ) -> Result<(), StepError> {
        let amount = resolve_integer(amount, "amount", ctx)?;

        let updated = ctx.update(variable, |current| match current {
            None | Some(Value::Null) => {
                warn!(
                    "Variable '{}' is not set, initializing it to {}",
                    variable, amount
                );
                Ok(Value::from(amount))
            }
            Some(value) => {
                let current = as_integer(value).ok_or_else(|| {
                    StepError::InvalidValue(format!(
                        "cannot increment '{}': {} is not an integer",
                        variable, value
                    ))
                })?;
                current
                    .checked_add(amount)
                    .map(Value::from)
                    .ok_or_else(|| {
                        StepError::InvalidValue(format!("incrementing '{}' overflows", variable))
                    })
            }
        })?;

        info!("Incremented {} to {}", variable, updated);
        Ok(())
    }

    /// Shuffles a list and partitions it into named groups stored under
    /// `<id>.output_groups`.
    pub(crate) fn split_list(
        &self,
        step: &Step,
        list: &Value,
        groups: &[GroupShare],
        ctx: &Context,
    ) -> Result<(), StepError> {
        let mut items = resolve_list(list, ctx)?;
        items.shuffle(&mut rand::thread_rng());

        let partitioned = partition(items, groups);
        for (name, members) in &partitioned {
            let size = members.as_array().map_or(0, Vec::len);
            info!("Group {} received {} item(s)", name, size);
        }

        match &step.id {
            Some(id) => ctx.set(format!("{}.output_groups", id), Value::Object(partitioned)),
            None => warn!("split_list step has no id, its groups are discarded"),
        }
        Ok(())
    }
}

/// Splits `items` into groups sized `len * percent / 100` (truncated), in
/// declaration order. Items left over go to the last group.
pub fn partition(items: Vec<Value>, groups: &[GroupShare]) -> Map<String, Value> {
    let total = items.len();
    let mut remaining = items.into_iter();

    let mut buckets: Vec<(String, Vec<Value>)> = groups
        .iter()
        .map(|group| {
            let size = total.saturating_mul(group.percent as usize) / 100;
            (group.name.clone(), remaining.by_ref().take(size).collect())
        })
        .collect();

    match buckets.last_mut() {
        Some((_, last)) => last.extend(remaining),
        None => warn!("split_list has no groups, dropping {} item(s)", total),
    }

    buckets
        .into_iter()
        .map(|(name, members)| (name, Value::Array(members)))
        .collect()
}

/// Resolves a list source: a literal list, a placeholder that resolves to a
/// list, or text holding a JSON array.
///
/// Any other scalar becomes a one-element list. Null or empty text is an
/// empty list.
pub(crate) fn resolve_list(list: &Value, ctx: &Context) -> Result<Vec<Value>, StepError> {
    let items = match resolve(list, ctx)? {
        Value::Array(items) => items,
        Value::Null => {
            warn!("List source resolved to nothing, using an empty list");
            Vec::new()
        }
        Value::String(text) if text.trim().is_empty() => {
            warn!("List source resolved to empty text, using an empty list");
            Vec::new()
        }
        Value::String(text) => match serde_json::from_str::<Value>(text.trim()) {
            Ok(Value::Array(items)) => items,
            _ => {
                warn!("List source '{}' is not a list, using it as a single item", text);
                vec![Value::String(text)]
            }
        },
        other => {
            warn!("List source {} is not a list, using it as a single item", other);
            vec![other]
        }
    };
    Ok(items)
}

/// Resolves a loop bound or amount to an integer.
pub(crate) fn resolve_integer(value: &Value, field: &str, ctx: &Context) -> Result<i64, StepError> {
    let resolved = resolve(value, ctx)?;
    as_integer(&resolved).ok_or_else(|| {
        StepError::InvalidValue(format!("'{}' must be an integer, got {}", field, resolved))
    })
}

/// Integer view of a value: integral numbers and numeric text.
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::dispatch::tests::harness;
    use crate::execution::dispatch::Flow;
    use crate::workflow::StepKind;
    use serde_json::json;

    fn condition(expr: &str, then: Vec<Step>, otherwise: Vec<Step>) -> Step {
        Step::new(StepKind::Condition {
            condition: expr.to_string(),
            then,
            otherwise,
        })
    }

    fn for_loop(variable: &str, start: Value, end: Value, increment: Value, steps: Vec<Step>) -> Step {
        Step::new(StepKind::ForLoop {
            variable: variable.to_string(),
            start,
            end,
            increment,
            steps,
        })
    }

    #[test]
    fn test_condition_branches() {
        let h = harness();
        let ctx = Context::new();
        ctx.set("x", 6);

        let step = condition(
            "{{ x }} > 5",
            vec![Step::notify("ok")],
            vec![Step::notify("no")],
        );
        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        ctx.set("x", 1);
        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert_eq!(h.notifier.messages(), vec!["ok", "no"]);
    }

    #[test]
    fn test_condition_with_bare_names() {
        let h = harness();
        let ctx = Context::new();
        ctx.set("status", "ready");
        ctx.set("retries", "2");

        let step = condition(
            "status == 'ready' and retries < 3",
            vec![Step::notify("go")],
            vec![],
        );
        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert_eq!(h.notifier.messages(), vec!["go"]);
    }

    #[test]
    fn test_invalid_condition_runs_neither_branch() {
        let h = harness();
        let ctx = Context::new();

        let step = condition("5 >", vec![Step::notify("then")], vec![Step::notify("else")]);
        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert!(h.notifier.messages().is_empty());
        assert_eq!(h.dispatcher.failures(), 1);
    }

    #[test]
    fn test_nested_failure_does_not_stop_body() {
        let h = harness();
        let ctx = Context::new();

        let step = condition(
            "true",
            vec![Step::command("fail:2"), Step::notify("after")],
            vec![],
        );
        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert_eq!(h.notifier.messages(), vec!["after"]);
        assert_eq!(h.dispatcher.failures(), 1);
    }

    #[test]
    fn test_for_loop_counts_up_exclusive() {
        let h = harness();
        let ctx = Context::new();

        let step = for_loop("i", json!(0), json!(3), json!(1), vec![Step::notify("i={{ i }}")]);
        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert_eq!(h.notifier.messages(), vec!["i=0", "i=1", "i=2"]);
        assert_eq!(ctx.get("i"), Some(json!(2)));
    }

    #[test]
    fn test_for_loop_counts_down_and_resolves_bounds() {
        let h = harness();
        let ctx = Context::new();
        ctx.set("top", "6");

        let step = for_loop(
            "i",
            json!("{{ top }}"),
            json!(0),
            json!(-2),
            vec![Step::notify("{{ i }}")],
        );
        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert_eq!(h.notifier.messages(), vec!["6", "4", "2"]);
    }

    #[test]
    fn test_for_loop_empty_range() {
        let h = harness();
        let ctx = Context::new();

        let step = for_loop("i", json!(5), json!(5), json!(1), vec![Step::notify("never")]);
        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert!(h.notifier.messages().is_empty());
        assert_eq!(ctx.get("i"), None);
    }

    #[test]
    fn test_for_loop_rejects_non_integer_bound() {
        let h = harness();
        let ctx = Context::new();

        let step = for_loop("i", json!("abc"), json!(3), json!(1), vec![Step::notify("x")]);
        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert!(h.notifier.messages().is_empty());
        assert_eq!(h.dispatcher.failures(), 1);
    }

    #[test]
    fn test_while_loop() {
        let h = harness();
        let ctx = Context::new();
        ctx.set("n", 0);

        let step = Step::new(StepKind::WhileLoop {
            condition: "n < 3".to_string(),
            steps: vec![Step::increment("n", 1)],
        });
        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert_eq!(ctx.get("n"), Some(json!(3)));
    }

    #[test]
    fn test_do_while_runs_body_once_when_false() {
        let h = harness();
        let ctx = Context::new();
        ctx.set("n", 10);

        let step = Step::new(StepKind::DoWhileLoop {
            condition: "n < 3".to_string(),
            steps: vec![Step::increment("n", 1)],
        });
        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert_eq!(ctx.get("n"), Some(json!(11)));
    }

    #[test]
    fn test_set_variable_keeps_types() {
        let h = harness();
        let ctx = Context::new();
        ctx.set("items", json!(["a", "b"]));

        h.dispatcher
            .dispatch(&Step::set("copy", "{{ items }}"), &ctx, Scope::TopLevel);
        h.dispatcher
            .dispatch(&Step::set("label", "n={{ items | length }}"), &ctx, Scope::TopLevel);
        h.dispatcher
            .dispatch(&Step::set("limit", json!(5)), &ctx, Scope::TopLevel);

        assert_eq!(ctx.get("copy"), Some(json!(["a", "b"])));
        assert_eq!(ctx.get("label"), Some(json!("n=2")));
        assert_eq!(ctx.get("limit"), Some(json!(5)));
    }

    #[test]
    fn test_increment_variable() {
        let h = harness();
        let ctx = Context::new();
        ctx.set("count", "4");

        h.dispatcher
            .dispatch(&Step::increment("count", 3), &ctx, Scope::TopLevel);
        h.dispatcher
            .dispatch(&Step::increment("fresh", 2), &ctx, Scope::TopLevel);

        assert_eq!(ctx.get("count"), Some(json!(7)));
        assert_eq!(ctx.get("fresh"), Some(json!(2)));
    }

    #[test]
    fn test_increment_non_numeric_fails() {
        let h = harness();
        let ctx = Context::new();
        ctx.set("name", "ada");

        h.dispatcher
            .dispatch(&Step::increment("name", 1), &ctx, Scope::TopLevel);

        assert_eq!(ctx.get("name"), Some(json!("ada")));
        assert_eq!(h.dispatcher.failures(), 1);
    }

    #[test]
    fn test_partition_sizes_and_remainder() {
        let items: Vec<Value> = (0..10).map(Value::from).collect();
        let groups = vec![
            GroupShare::new("a", 33),
            GroupShare::new("b", 33),
            GroupShare::new("c", 34),
        ];

        let result = partition(items, &groups);

        assert_eq!(result["a"].as_array().unwrap().len(), 3);
        assert_eq!(result["b"].as_array().unwrap().len(), 3);
        assert_eq!(result["c"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_partition_remainder_goes_to_last_group() {
        let items: Vec<Value> = (0..3).map(Value::from).collect();
        let groups = vec![GroupShare::new("half", 50), GroupShare::new("rest", 50)];

        let result = partition(items, &groups);

        assert_eq!(result["half"], json!([0]));
        assert_eq!(result["rest"], json!([1, 2]));
    }

    #[test]
    fn test_partition_sixty_forty() {
        for n in [0usize, 1, 7, 10, 33] {
            let items: Vec<Value> = (0..n).map(Value::from).collect();
            let groups = vec![GroupShare::new("g1", 60), GroupShare::new("g2", 40)];

            let result = partition(items, &groups);

            let g1 = result["g1"].as_array().unwrap().len();
            let g2 = result["g2"].as_array().unwrap().len();
            assert_eq!(g1, n * 60 / 100);
            assert_eq!(g2, n - g1);
        }
    }

    #[test]
    fn test_increment_accumulates_from_fresh_key() {
        let h = harness();
        let ctx = Context::new();

        h.dispatcher.dispatch(&Step::increment("k", 4), &ctx, Scope::TopLevel);
        assert_eq!(ctx.get("k"), Some(json!(4)));

        h.dispatcher.dispatch(&Step::increment("k", -9), &ctx, Scope::TopLevel);
        assert_eq!(ctx.get("k"), Some(json!(-5)));
    }

    #[test]
    fn test_split_list_stores_every_item_once() {
        let h = harness();
        let ctx = Context::new();
        ctx.set("people", json!(["a", "b", "c", "d", "e"]));

        let step = Step::new(StepKind::SplitList {
            list: json!("{{ people }}"),
            groups: vec![GroupShare::new("control", 40), GroupShare::new("test", 60)],
        })
        .with_id("ab");
        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        let groups = ctx.get("ab.output_groups").unwrap();
        let control = groups["control"].as_array().unwrap();
        let test = groups["test"].as_array().unwrap();
        assert_eq!(control.len(), 2);
        assert_eq!(test.len(), 3);

        let mut all: Vec<String> = control
            .iter()
            .chain(test.iter())
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        all.sort();
        assert_eq!(all, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_resolve_list_sources() {
        let ctx = Context::new();
        ctx.set_output("fetch", "[1, 2, 3]");
        ctx.set("single", "solo");

        assert_eq!(
            resolve_list(&json!("{{ fetch.output }}"), &ctx).unwrap(),
            vec![json!(1), json!(2), json!(3)]
        );
        assert_eq!(
            resolve_list(&json!("{{ single }}"), &ctx).unwrap(),
            vec![json!("solo")]
        );
        assert_eq!(resolve_list(&json!(["x"]), &ctx).unwrap(), vec![json!("x")]);
        assert!(resolve_list(&json!("{{ missing }}"), &ctx).unwrap().is_empty());
    }

    #[test]
    fn test_goto_in_condition_ends_body_and_jumps() {
        let h = harness();
        let ctx = Context::new();

        let step = condition(
            "true",
            vec![Step::goto("start"), Step::notify("skipped")],
            vec![],
        );
        let outcome = h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert_eq!(outcome.flow, Flow::Jump("start".to_string()));
        assert!(outcome.succeeded);
        assert!(h.notifier.messages().is_empty());
    }

    #[test]
    fn test_goto_leaves_enclosing_loops() {
        let h = harness();
        let ctx = Context::new();

        let inner = condition("i == 2", vec![Step::goto("retry")], vec![]);
        let step = for_loop(
            "i",
            json!(0),
            json!(10),
            json!(1),
            vec![Step::notify("i={{ i }}"), inner],
        );
        let outcome = h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert_eq!(outcome.flow, Flow::Jump("retry".to_string()));
        assert_eq!(h.notifier.messages(), vec!["i=0", "i=1", "i=2"]);
        assert_eq!(ctx.get("i"), Some(json!(2)));
    }

    #[test]
    fn test_goto_inside_while_body_stops_loop() {
        let h = harness();
        let ctx = Context::new();
        ctx.set("n", 0);

        let step = Step::new(StepKind::WhileLoop {
            condition: "true".to_string(),
            steps: vec![
                Step::increment("n", 1),
                condition("n >= 4", vec![Step::goto("done")], vec![]),
            ],
        });
        let outcome = h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert_eq!(outcome.flow, Flow::Jump("done".to_string()));
        assert_eq!(ctx.get("n"), Some(json!(4)));
    }

    #[test]
    fn test_nested_failure_marks_outcome() {
        let h = harness();
        let ctx = Context::new();

        let step = condition(
            "true",
            vec![Step::command("fail:3"), Step::notify("after")],
            vec![],
        );
        let outcome = h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert_eq!(outcome, StepOutcome::failed());
        assert_eq!(h.notifier.messages(), vec!["after"]);
    }

    #[test]
    fn test_while_loop_reresolves_template_each_iteration() {
        let h = harness();
        let ctx = Context::new();
        ctx.set("n", 0);

        let step = Step::new(StepKind::WhileLoop {
            condition: "{{ n }} < 3".to_string(),
            steps: vec![Step::notify("n={{ n }}"), Step::increment("n", 1)],
        });
        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert_eq!(ctx.get("n"), Some(json!(3)));
        assert_eq!(h.notifier.messages(), vec!["n=0", "n=1", "n=2"]);
        assert_eq!(h.dispatcher.failures(), 0);
    }

    #[test]
    fn test_do_while_reresolves_template_each_iteration() {
        let h = harness();
        let ctx = Context::new();
        ctx.set("n", 0);

        let step = Step::new(StepKind::DoWhileLoop {
            condition: "{{ n }} < 3".to_string(),
            steps: vec![Step::increment("n", 1)],
        });
        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);
        assert_eq!(ctx.get("n"), Some(json!(3)));

        ctx.set("n", 7);
        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);
        assert_eq!(ctx.get("n"), Some(json!(8)));
        assert_eq!(h.dispatcher.failures(), 0);
    }

    #[test]
    fn test_partition_oversized_percent_does_not_overflow() {
        let items: Vec<Value> = (0..4).map(Value::from).collect();
        let groups = vec![GroupShare::new("all", u32::MAX), GroupShare::new("rest", 10)];

        let result = partition(items, &groups);

        assert_eq!(result["all"], json!([0, 1, 2, 3]));
        assert_eq!(result["rest"], json!([]));
    }
}
