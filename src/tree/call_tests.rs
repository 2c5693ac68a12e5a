//! Call scenarios: resolution, parameter mirroring, delegation, forwards,
//! and the binding graph around call boundaries.

use std::cell::RefCell;
use std::rc::Rc;

use crate::events::{EventFilter, EventKind};
use crate::tree::*;
use crate::version::WdlVersion;

/// A document with a `sum` task (inputs x: Int, y: Int = "1"; output out)
/// and an empty `main` workflow.
fn fixture() -> (Document, EntityId, EntityId) {
    let mut doc = Document::new(WdlVersion::V1_0);
    let root = doc.root();
    let mut task = ActionOptions::task("sum");
    task.inputs = vec![
        ParameterOptions::typed("x", "Int"),
        ParameterOptions::typed("y", "Int").with_value("1"),
    ];
    task.outputs = vec![ParameterOptions::typed("out", "Int").with_value("x + y")];
    let task = doc.add_action(root, task).unwrap().unwrap();
    let workflow = doc
        .add_action(root, ActionOptions::workflow("main"))
        .unwrap()
        .unwrap();
    (doc, task, workflow)
}

fn input_names(doc: &Document, owner: EntityId) -> Vec<String> {
    doc.members(owner, Role::Inputs)
        .into_iter()
        .filter_map(|member| doc.name(member))
        .collect()
}

mod resolution {
    use super::*;

    #[test]
    fn test_call_resolves_and_mirrors_parameters() {
        let (mut doc, task, workflow) = fixture();
        let call = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();

        assert_eq!(doc.call_executable(call), Some(task));
        assert_eq!(input_names(&doc, call), vec!["x", "y"]);
        let outputs = doc.members(call, Role::Outputs);
        assert_eq!(outputs.len(), 1);
        assert_eq!(doc.name(outputs[0]).as_deref(), Some("out"));

        // each mirrored parameter delegates to the callee's formal
        let formal_x = doc.members(task, Role::Inputs)[0];
        let call_x = doc.members(call, Role::Inputs)[0];
        assert_eq!(doc.parameter_delegate(call_x), Some(formal_x));
    }

    #[test]
    fn test_delegate_reads_type_and_default() {
        let (mut doc, _, workflow) = fixture();
        let call = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();
        let call_x = doc.members(call, Role::Inputs)[0];
        let call_y = doc.members(call, Role::Inputs)[1];

        assert_eq!(
            doc.parameter_type(call_x),
            Some("Int".parse::<crate::types::ParameterType>().unwrap())
        );
        // y's default lives on the formal; the call side has no value of its own
        assert_eq!(doc.parameter_value(call_y), None);
        assert_eq!(doc.parameter_default(call_y).as_deref(), Some("1"));
    }

    #[test]
    fn test_retarget_resyncs_parameters_and_forwards() {
        let (mut doc, _, workflow) = fixture();
        let root = doc.root();
        let mut other = ActionOptions::task("scale");
        other.inputs = vec![ParameterOptions::typed("factor", "Float")];
        let other = doc.add_action(root, other).unwrap().unwrap();
        let call = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();
        assert_eq!(input_names(&doc, call), vec!["x", "y"]);

        doc.set_call_target(call, "scale").unwrap();
        assert_eq!(doc.call_executable(call), Some(other));
        assert_eq!(input_names(&doc, call), vec!["factor"]);
        // the forward moved with the resolution
        assert!(doc
            .forwards
            .iter()
            .all(|forward| forward.listener != call || forward.source == other));
    }

    #[test]
    fn test_unresolved_target_keeps_call_bare() {
        let (mut doc, _, workflow) = fixture();
        let call = doc
            .add_action(workflow, ActionOptions::call("nowhere"))
            .unwrap()
            .unwrap();
        assert_eq!(doc.call_executable(call), None);
        assert!(doc.members(call, Role::Inputs).is_empty());
        assert!(!doc.entity_valid(call));

        // once the task appears the same target resolves on the next pass
        doc.add_action(doc.root(), ActionOptions::task("nowhere"))
            .unwrap();
        assert!(doc.call_executable(call).is_some());
        assert!(doc.entity_valid(call));
    }

    #[test]
    fn test_removing_call_tears_down_forwards() {
        let (mut doc, _, workflow) = fixture();
        let call = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();
        assert!(doc.forwards.iter().any(|forward| forward.listener == call));

        doc.remove_action(call).unwrap();
        assert!(doc.forwards.is_empty());
        assert!(doc.get(call).is_none());
    }
}

mod parameter_sync {
    use super::*;

    #[test]
    fn test_new_formal_input_appears_on_call() {
        let (mut doc, task, workflow) = fixture();
        let call = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();

        doc.add_parameter(task, Role::Inputs, ParameterOptions::typed("z", "Int"))
            .unwrap();
        assert_eq!(input_names(&doc, call), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_removed_formal_input_drops_from_call_once() {
        let (mut doc, task, workflow) = fixture();
        let call = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();

        let removed: Rc<RefCell<usize>> = Rc::default();
        let changed: Rc<RefCell<usize>> = Rc::default();
        let removed_count = removed.clone();
        doc.on(
            EventFilter::target(call).with_kinds([EventKind::MembersRemoved]),
            move |_, _| *removed_count.borrow_mut() += 1,
        );
        let changed_count = changed.clone();
        doc.on(
            EventFilter::target(call).with_kinds([EventKind::MembersChanged]),
            move |_, _| *changed_count.borrow_mut() += 1,
        );

        let formal_x = doc.members(task, Role::Inputs)[0];
        doc.remove_parameter(formal_x).unwrap();

        assert_eq!(input_names(&doc, call), vec!["y"]);
        // the whole sync coalesced into one removal and one change marker
        assert_eq!(*removed.borrow(), 1);
        assert_eq!(*changed.borrow(), 1);
    }

    #[test]
    fn test_stale_call_input_connections_unbind() {
        let (mut doc, task, workflow) = fixture();
        let source = doc
            .add_parameter(workflow, Role::Inputs, ParameterOptions::typed("n", "Int"))
            .unwrap();
        let call = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();
        let call_x = doc.members(call, Role::Inputs)[0];
        doc.bind(source, call_x).unwrap();
        assert_eq!(doc.outbound(source), vec![call_x]);

        let formal_x = doc.members(task, Role::Inputs)[0];
        doc.remove_parameter(formal_x).unwrap();
        assert!(doc.outbound(source).is_empty());
    }

    #[test]
    fn test_pending_values_drain_as_inputs_materialize() {
        let (mut doc, _, workflow) = fixture();
        let mut options = ActionOptions::call("sum");
        options.values.insert("x".to_string(), "41".to_string());
        options.values.insert("ghost".to_string(), "1".to_string());
        let call = doc.add_action(workflow, options).unwrap().unwrap();

        let call_x = doc.members(call, Role::Inputs)[0];
        assert_eq!(doc.parameter_value(call_x).as_deref(), Some("41"));
        // values naming inputs the callee lacks stay pending
        let data = doc.get(call).unwrap().as_call().unwrap();
        assert_eq!(data.pending_values.get("ghost").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_set_call_input_by_name() {
        let (mut doc, _, workflow) = fixture();
        let call = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();

        let input = doc.set_call_input(call, "x", Some("7".to_string())).unwrap();
        assert_eq!(doc.parameter_value(input).as_deref(), Some("7"));
        let err = doc
            .set_call_input(call, "ghost", Some("1".to_string()))
            .unwrap_err();
        assert!(matches!(err, crate::error::ModelError::UnknownMember { .. }));
    }
}

mod aliasing {
    use super::*;

    #[test]
    fn test_second_call_gets_numeric_suffix() {
        let (mut doc, _, workflow) = fixture();
        let first = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();
        let second = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();
        let third = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();

        // the first call keeps the callee's name; later ones alias apart
        assert_eq!(doc.reference(first).as_deref(), Some("sum"));
        assert_eq!(doc.reference(second).as_deref(), Some("sum_1"));
        assert_eq!(doc.reference(third).as_deref(), Some("sum_2"));
        // the aliases keep the siblings free of collision errors
        assert!(doc.entity_errors(workflow).is_empty());
    }

    #[test]
    fn test_collision_with_global_name_is_suffixed() {
        let (mut doc, _, workflow) = fixture();
        let root = doc.root();
        doc.add_action(root, ActionOptions::task("scale")).unwrap();
        // a call to sum aliased to a global task's name collides with it
        let mut options = ActionOptions::call("sum");
        options.alias = Some("scale".to_string());
        let call = doc.add_action(workflow, options).unwrap().unwrap();
        assert_eq!(doc.reference(call).as_deref(), Some("scale_1"));
    }

    #[test]
    fn test_suffix_comparison_ignores_case() {
        let (mut doc, _, workflow) = fixture();
        let first = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();
        doc.set_alias(first, Some("Sum".to_string())).unwrap();
        let second = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();
        assert_eq!(doc.reference(second).as_deref(), Some("sum_1"));
    }
}

mod binding {
    use super::*;

    #[test]
    fn test_call_output_feeds_workflow_output() {
        let (mut doc, _, workflow) = fixture();
        let call = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();
        let result = doc
            .add_parameter(
                workflow,
                Role::Outputs,
                ParameterOptions::typed("result", "Int"),
            )
            .unwrap();
        let call_out = doc.members(call, Role::Outputs)[0];
        doc.bind(call_out, result).unwrap();

        // connected parameters render as the source's qualified reference
        assert_eq!(doc.rendered_value(result).as_deref(), Some("sum.out"));
        doc.set_alias(call, Some("total".to_string())).unwrap();
        assert_eq!(doc.rendered_value(result).as_deref(), Some("total.out"));
    }

    #[test]
    fn test_single_inbound_replaced_by_rebind() {
        let (mut doc, _, workflow) = fixture();
        let sources = doc
            .add_parameters(
                workflow,
                Role::Inputs,
                vec![
                    ParameterOptions::typed("a", "Int"),
                    ParameterOptions::typed("b", "Int"),
                ],
            )
            .unwrap();
        let call = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();
        let call_x = doc.members(call, Role::Inputs)[0];

        doc.bind(sources[0], call_x).unwrap();
        doc.bind(sources[1], call_x).unwrap();
        assert_eq!(doc.inbound(call_x), vec![sources[1]]);
        assert!(doc.outbound(sources[0]).is_empty());
    }

    #[test]
    fn test_scatter_iterator_gathers_many_sources() {
        let (mut doc, _, workflow) = fixture();
        let sources = doc
            .add_parameters(
                workflow,
                Role::Inputs,
                vec![
                    ParameterOptions::typed("xs", "Array[Int]"),
                    ParameterOptions::typed("ys", "Array[Int]"),
                ],
            )
            .unwrap();
        let scatter = doc
            .add_action(
                workflow,
                ActionOptions::scatter(ParameterOptions::new("item")),
            )
            .unwrap()
            .unwrap();
        let iterator = doc.scatter_iterator(scatter).unwrap();

        doc.bind(sources[0], iterator).unwrap();
        doc.bind(sources[1], iterator).unwrap();
        assert_eq!(doc.inbound(iterator), sources);
    }

    #[test]
    fn test_self_binding_rejected() {
        let (mut doc, _, workflow) = fixture();
        let param = doc
            .add_parameter(workflow, Role::Inputs, ParameterOptions::typed("a", "Int"))
            .unwrap();
        let err = doc.bind(param, param).unwrap_err();
        assert!(matches!(err, crate::error::ModelError::SelfBinding { .. }));
    }
}

mod forwarding {
    use super::*;

    #[test]
    fn test_command_change_reaches_call() {
        let (mut doc, task, workflow) = fixture();
        let call = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();

        let seen: Rc<RefCell<usize>> = Rc::default();
        let count = seen.clone();
        doc.on(
            EventFilter::target(call).with_kinds([EventKind::CommandChanged]),
            move |_, _| *count.borrow_mut() += 1,
        );
        doc.set_command(task, "echo updated").unwrap();
        assert_eq!(*seen.borrow(), 1);
    }
}
