//! Document-level scenarios: ownership wiring, events, batching, imports,
//! and validation aggregation.

use std::cell::RefCell;
use std::rc::Rc;

use crate::events::{Delivery, EventFilter, EventKind};
use crate::tree::*;
use crate::version::WdlVersion;

fn doc() -> Document {
    Document::new(WdlVersion::V1_0)
}

/// Collects deliveries matching a filter into a shared vector.
fn record(doc: &mut Document, filter: EventFilter) -> Rc<RefCell<Vec<Delivery>>> {
    let seen: Rc<RefCell<Vec<Delivery>>> = Rc::default();
    let sink = seen.clone();
    doc.on(filter, move |_, delivery| {
        sink.borrow_mut().push(delivery.clone());
    });
    seen
}

mod reference_and_naming {
    use super::*;

    #[test]
    fn test_reference_prefers_alias() {
        let mut doc = doc();
        let root = doc.root();
        doc.add_action(root, ActionOptions::task("sum")).unwrap();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();
        let call = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();

        assert_eq!(doc.reference(workflow).as_deref(), Some("main"));
        // unaliased call falls back to its target's tail
        assert_eq!(doc.reference(call).as_deref(), Some("sum"));

        doc.set_alias(call, Some("total".to_string())).unwrap();
        assert_eq!(doc.reference(call).as_deref(), Some("total"));
        doc.set_alias(call, None).unwrap();
        assert_eq!(doc.reference(call).as_deref(), Some("sum"));
    }

    #[test]
    fn test_alias_rejected_on_parameters() {
        let mut doc = doc();
        let root = doc.root();
        let task = doc
            .add_action(root, ActionOptions::task("sum"))
            .unwrap()
            .unwrap();
        let input = doc
            .add_parameter(task, Role::Inputs, ParameterOptions::typed("x", "Int"))
            .unwrap();
        assert!(doc.set_alias(input, Some("y".to_string())).is_err());
    }

    #[test]
    fn test_find_filters_by_kind_and_reference() {
        let mut doc = doc();
        let root = doc.root();
        let mut task = ActionOptions::task("sum");
        task.inputs = vec![ParameterOptions::typed("x", "Int")];
        doc.add_action(root, task).unwrap();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();
        doc.add_parameter(workflow, Role::Inputs, ParameterOptions::typed("x", "Int"))
            .unwrap();

        assert_eq!(doc.find(root, "x", &[]).len(), 2);
        assert_eq!(doc.find(root, "x", &[ContextKind::Input]).len(), 2);
        assert_eq!(doc.find(workflow, "x", &[]).len(), 1);
        assert_eq!(doc.find(root, "sum", &[ContextKind::Task]).len(), 1);
        assert!(doc.find(root, "sum", &[ContextKind::Workflow]).is_empty());
    }

    #[test]
    fn test_is_parent_for_walks_ancestors() {
        let mut doc = doc();
        let root = doc.root();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();
        let scatter = doc
            .add_action(
                workflow,
                ActionOptions::scatter(ParameterOptions::new("item")),
            )
            .unwrap()
            .unwrap();
        let iterator = doc.scatter_iterator(scatter).unwrap();

        assert!(doc.is_parent_for(root, iterator));
        assert!(doc.is_parent_for(workflow, iterator));
        assert!(doc.is_parent_for(workflow, scatter));
        assert!(!doc.is_parent_for(scatter, workflow));
        assert!(!doc.is_parent_for(iterator, iterator));
    }
}

mod collections_and_ownership {
    use super::*;

    #[test]
    fn test_membership_sets_and_clears_parent() {
        let mut doc = doc();
        let root = doc.root();
        let task = doc
            .add_action(root, ActionOptions::task("sum"))
            .unwrap()
            .unwrap();
        let input = doc
            .add_parameter(task, Role::Inputs, ParameterOptions::typed("x", "Int"))
            .unwrap();
        assert_eq!(doc.parent(input), Some(task));
        assert_eq!(doc.members(task, Role::Inputs), vec![input]);

        doc.remove_parameter(input).unwrap();
        assert!(doc.get(input).is_none());
        assert!(doc.members(task, Role::Inputs).is_empty());
    }

    #[test]
    fn test_removed_member_emits_nothing_further() {
        let mut doc = doc();
        let root = doc.root();
        let task = doc
            .add_action(root, ActionOptions::task("sum"))
            .unwrap()
            .unwrap();
        let input = doc
            .add_parameter(task, Role::Inputs, ParameterOptions::typed("x", "Int"))
            .unwrap();

        let seen = record(
            &mut doc,
            EventFilter::target(task).with_kinds([EventKind::ValueChanged]),
        );
        doc.set_value(input, Some("1".to_string())).unwrap();
        assert_eq!(seen.borrow().len(), 1);

        doc.remove_parameter(input).unwrap();
        // a stale handle mutates nothing and emits nothing
        assert!(doc.set_value(input, Some("2".to_string())).is_err());
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_removal_notice_carries_retired_ids() {
        let mut doc = doc();
        let root = doc.root();
        let task = doc
            .add_action(root, ActionOptions::task("sum"))
            .unwrap()
            .unwrap();
        let seen = record(
            &mut doc,
            EventFilter::target(task).with_kinds([EventKind::MembersRemoved]),
        );
        let input = doc
            .batch(|doc| {
                let input =
                    doc.add_parameter(task, Role::Inputs, ParameterOptions::typed("x", "Int"))?;
                doc.remove_parameter(input)?;
                Ok(input)
            })
            .unwrap();

        // the notification names the member even though its id is retired
        assert!(doc.get(input).is_none());
        let deliveries = seen.borrow();
        assert_eq!(deliveries.len(), 1);
        match &deliveries[0].event {
            crate::events::Event::MembersRemoved { role, members } => {
                assert_eq!(*role, Role::Inputs);
                assert_eq!(members, &vec![input]);
            }
            other => panic!("expected MembersRemoved, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_parameter_name_is_structural_error() {
        let mut doc = doc();
        let root = doc.root();
        let task = doc
            .add_action(root, ActionOptions::task("sum"))
            .unwrap()
            .unwrap();
        doc.add_parameter(task, Role::Inputs, ParameterOptions::typed("x", "Int"))
            .unwrap();
        let err = doc
            .add_parameter(task, Role::Inputs, ParameterOptions::typed("x", "Int"))
            .unwrap_err();
        assert!(matches!(err, crate::error::ModelError::DuplicateName { .. }));
        // the failed record did not leak into the collection
        assert_eq!(doc.members(task, Role::Inputs).len(), 1);
    }

    #[test]
    fn test_reparenting_detaches_first() {
        let mut doc = doc();
        let root = doc.root();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();
        let conditional = doc
            .add_action(workflow, ActionOptions::conditional("flag"))
            .unwrap()
            .unwrap();
        let declaration = doc
            .add_parameter(
                workflow,
                Role::Declarations,
                ParameterOptions::typed("d", "Int"),
            )
            .unwrap();

        doc.move_member(conditional, Role::Declarations, declaration, None)
            .unwrap();
        assert_eq!(doc.parent(declaration), Some(conditional));
        assert!(doc.members(workflow, Role::Declarations).is_empty());
        assert_eq!(doc.members(conditional, Role::Declarations), vec![declaration]);
    }

    #[test]
    fn test_remove_subtree_invalidates_ids_and_unbinds() {
        let mut doc = doc();
        let root = doc.root();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();
        let source = doc
            .add_parameter(workflow, Role::Inputs, ParameterOptions::typed("a", "Int"))
            .unwrap();
        let conditional = doc
            .add_action(workflow, ActionOptions::conditional("flag"))
            .unwrap()
            .unwrap();
        let target = doc
            .add_parameter(
                conditional,
                Role::Declarations,
                ParameterOptions::typed("b", "Int"),
            )
            .unwrap();
        doc.bind(source, target).unwrap();
        assert_eq!(doc.outbound(source), vec![target]);

        doc.remove_action(conditional).unwrap();
        assert!(doc.get(conditional).is_none());
        assert!(doc.get(target).is_none());
        // the edge out of the removed subtree is gone in both directions
        assert!(doc.outbound(source).is_empty());
    }
}

mod events_and_batching {
    use super::*;

    #[test]
    fn test_member_events_bubble_to_ancestors() {
        let mut doc = doc();
        let root = doc.root();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();
        let seen = record(
            &mut doc,
            EventFilter::target(root).with_kinds([EventKind::MembersAdded]),
        );
        doc.add_parameter(workflow, Role::Inputs, ParameterOptions::typed("x", "Int"))
            .unwrap();
        let deliveries = seen.borrow();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].origin, workflow);
        assert_eq!(deliveries[0].at, root);
    }

    #[test]
    fn test_version_change_spreads_to_descendants() {
        let mut doc = doc();
        let root = doc.root();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();
        let input = doc
            .add_parameter(workflow, Role::Inputs, ParameterOptions::typed("x", "Int"))
            .unwrap();

        let seen = record(
            &mut doc,
            EventFilter::target(input).with_kinds([EventKind::VersionChanged]),
        );
        doc.set_version(WdlVersion::V1_1).unwrap();
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(doc.version(), WdlVersion::V1_1);
    }

    #[test]
    fn test_batch_coalesces_into_one_tree_change() {
        let mut doc = doc();
        let root = doc.root();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();

        let seen = record(
            &mut doc,
            EventFilter::target(root).with_kinds([EventKind::TreeChanged]),
        );
        doc.batch(|doc| {
            doc.add_parameter(workflow, Role::Inputs, ParameterOptions::typed("a", "Int"))?;
            doc.add_parameter(workflow, Role::Inputs, ParameterOptions::typed("b", "Int"))?;
            doc.add_parameter(workflow, Role::Inputs, ParameterOptions::typed("c", "Int"))?;
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_batch_merges_member_events() {
        let mut doc = doc();
        let root = doc.root();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();

        let seen = record(
            &mut doc,
            EventFilter::target(workflow)
                .with_kinds([EventKind::MembersAdded, EventKind::MembersChanged]),
        );
        doc.add_parameters(
            workflow,
            Role::Inputs,
            vec![
                ParameterOptions::typed("a", "Int"),
                ParameterOptions::typed("b", "Int"),
            ],
        )
        .unwrap();

        let deliveries = seen.borrow();
        assert_eq!(deliveries.len(), 2);
        match &deliveries[0].event {
            crate::events::Event::MembersAdded { role, members } => {
                assert_eq!(*role, Role::Inputs);
                assert_eq!(members.len(), 2);
            }
            other => panic!("expected MembersAdded, got {:?}", other),
        }
        assert!(matches!(
            deliveries[1].event,
            crate::events::Event::MembersChanged { role: Role::Inputs }
        ));
    }

    #[test]
    fn test_bind_and_unbind_deliver_edge_events() {
        let mut doc = doc();
        let root = doc.root();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();
        let params = doc
            .add_parameters(
                workflow,
                Role::Declarations,
                vec![
                    ParameterOptions::typed("a", "Int").with_value("1"),
                    ParameterOptions::typed("b", "Int"),
                ],
            )
            .unwrap();

        let seen = record(
            &mut doc,
            EventFilter::target(root)
                .with_kinds([EventKind::ParameterBind, EventKind::ParameterUnbind]),
        );
        doc.bind(params[0], params[1]).unwrap();
        assert_eq!(doc.outbound(params[0]), vec![params[1]]);
        assert_eq!(doc.inbound(params[1]), vec![params[0]]);

        doc.unbind(params[0], params[1]).unwrap();
        assert!(doc.outbound(params[0]).is_empty());
        assert!(doc.inbound(params[1]).is_empty());

        // each edge change bubbles to the root exactly once
        let deliveries = seen.borrow();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(
            deliveries[0].event,
            crate::events::Event::ParameterBind {
                source: params[0],
                target: params[1],
            }
        );
        assert_eq!(deliveries[0].origin, params[1]);
        assert_eq!(
            deliveries[1].event,
            crate::events::Event::ParameterUnbind {
                source: params[0],
                target: params[1],
            }
        );
    }

    #[test]
    fn test_batch_restores_notification_on_error() {
        let mut doc = doc();
        let root = doc.root();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();

        let result = doc.batch(|doc| {
            doc.add_parameter(workflow, Role::Inputs, ParameterOptions::typed("a", "Int"))?;
            doc.add_parameter(workflow, Role::Inputs, ParameterOptions::typed("a", "Int"))?;
            Ok(())
        });
        assert!(result.is_err());

        // the guard released; later mutations notify normally
        let seen = record(
            &mut doc,
            EventFilter::target(root).with_kinds([EventKind::TreeChanged]),
        );
        doc.add_parameter(workflow, Role::Inputs, ParameterOptions::typed("b", "Int"))
            .unwrap();
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_handler_may_mutate_during_dispatch() {
        let mut doc = doc();
        let root = doc.root();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();

        // every freshly added input gets a default value from the handler
        doc.on(
            EventFilter::target(workflow).with_kinds([EventKind::MembersAdded]),
            move |doc, delivery| {
                if let crate::events::Event::MembersAdded { members, .. } = &delivery.event {
                    for member in members.clone() {
                        let _ = doc.set_value(member, Some("0".to_string()));
                    }
                }
            },
        );
        let input = doc
            .add_parameter(workflow, Role::Inputs, ParameterOptions::typed("x", "Int"))
            .unwrap();
        assert_eq!(doc.parameter_value(input).as_deref(), Some("0"));
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let mut doc = doc();
        let root = doc.root();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();

        let slot: Rc<RefCell<Option<crate::events::SubscriberId>>> = Rc::default();
        let handle = slot.clone();
        let count: Rc<RefCell<usize>> = Rc::default();
        let counter = count.clone();
        let id = doc.on(
            EventFilter::target(workflow).with_kinds([EventKind::MembersAdded]),
            move |doc, _| {
                *counter.borrow_mut() += 1;
                if let Some(id) = handle.borrow_mut().take() {
                    doc.off(id);
                }
            },
        );
        *slot.borrow_mut() = Some(id);

        doc.add_parameter(workflow, Role::Inputs, ParameterOptions::typed("a", "Int"))
            .unwrap();
        doc.add_parameter(workflow, Role::Inputs, ParameterOptions::typed("b", "Int"))
            .unwrap();
        assert_eq!(*count.borrow(), 1);
        assert!(!doc.off(id));
    }
}

mod ingestion_and_imports {
    use super::*;

    #[test]
    fn test_from_options_builds_whole_tree() {
        let options: DocumentOptions = serde_json::from_value(serde_json::json!({
            "version": "1.0",
            "actions": [
                {
                    "kind": "task",
                    "name": "greet",
                    "inputs": [{ "name": "who", "type": "String" }],
                    "command": "echo hello ~{who}",
                    "outputs": [{ "name": "out", "type": "String", "value": "stdout()" }]
                },
                {
                    "kind": "workflow",
                    "name": "main",
                    "actions": [
                        { "kind": "call", "target": "greet", "values": { "who": "\"world\"" } }
                    ]
                }
            ]
        }))
        .unwrap();

        let doc = Document::from_options(options).unwrap();
        let actions = doc.actions();
        assert_eq!(actions.len(), 2);
        let workflow = actions[1];
        let call = doc.members(workflow, Role::Actions)[0];
        let executable = doc.call_executable(call).unwrap();
        assert_eq!(doc.name(executable).as_deref(), Some("greet"));
        // the pending value landed on the materialized call input
        let who = doc.members(call, Role::Inputs)[0];
        assert_eq!(doc.parameter_value(who).as_deref(), Some("\"world\""));
        assert!(doc.entity_valid(doc.root()));
    }

    #[test]
    fn test_unknown_action_kind_is_reported_not_thrown() {
        let mut doc = doc();
        let root = doc.root();
        let mut options = ActionOptions::task("fine");
        options.kind = "pipeline".to_string();
        let created = doc.add_action(root, options).unwrap();
        assert!(created.is_none());
        let issues = doc.ingest_issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(
            issues[0].kind,
            crate::diagnostics::DiagnosticKind::UnknownActionKind
        );
        assert!(doc.actions().is_empty());
    }

    #[test]
    fn test_pending_import_resolves_call_once_loaded() {
        struct Host;
        impl ImportResolver for Host {
            fn resolve(&self, uri: &str) -> Option<DocumentOptions> {
                (uri == "lib.wdl").then(|| DocumentOptions {
                    version: Some("1.0".to_string()),
                    actions: vec![ActionOptions::task("sum")],
                    ..DocumentOptions::default()
                })
            }
        }

        let mut doc = doc();
        let root = doc.root();
        doc.add_import(ImportOptions {
            uri: Some("lib.wdl".to_string()),
            ..ImportOptions::default()
        })
        .unwrap();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();
        let call = doc
            .add_action(workflow, ActionOptions::call("lib.sum"))
            .unwrap()
            .unwrap();

        // unresolved while the import is pending: a warning, not an error
        assert!(doc.call_executable(call).is_none());
        assert!(!doc.entity_valid(call));
        assert_eq!(doc.pending_imports().len(), 1);

        assert_eq!(doc.load_imports(&Host).unwrap(), 1);
        assert!(doc.pending_imports().is_empty());
        assert!(doc.call_executable(call).is_some());
        assert!(doc.entity_valid(call));
    }

    #[test]
    fn test_import_namespace_defaults_to_file_stem() {
        let mut doc = doc();
        let import = doc
            .add_import(ImportOptions {
                uri: Some("tools/align.wdl".to_string()),
                ..ImportOptions::default()
            })
            .unwrap();
        assert_eq!(doc.name(import).as_deref(), Some("align"));
    }
}

mod validation_aggregation {
    use super::*;

    #[test]
    fn test_child_issues_reflect_upward_without_duplication() {
        let mut doc = doc();
        let root = doc.root();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();
        doc.add_action(workflow, ActionOptions::call("missing"))
            .unwrap();

        // the workflow raises nothing itself but reflects the call's finding
        assert!(doc.self_diagnostics(workflow).is_empty());
        assert_eq!(doc.entity_issues(workflow).len(), 1);
        assert_eq!(doc.entity_issues(root).len(), 1);
        assert!(!doc.entity_valid(root));
        assert!(doc.entity_errors(root).is_empty());
        assert_eq!(doc.entity_warnings(root).len(), 1);
    }

    #[test]
    fn test_validate_throws_only_on_request() {
        let mut doc = doc();
        let root = doc.root();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();
        doc.add_action(workflow, ActionOptions::call("")).unwrap();

        assert_eq!(doc.validate(root, false).unwrap().len(), 1);
        let err = doc.validate(root, true).unwrap_err();
        assert!(matches!(err, crate::error::ModelError::Invalid { .. }));
    }
}
