use std::sync::{Arc, Mutex};

use waypoint_core::ManagedScope;
use waypoint_nav::{NavKey, NavStack};
use waypoint_testing::TestHost;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum Screen {
    Home,
    List,
    Details,
}

impl NavKey for Screen {
    fn name(&self) -> &str {
        match self {
            Screen::Home => "home",
            Screen::List => "list",
            Screen::Details => "details",
        }
    }
}

type Stack = NavStack<Screen, String>;

fn stack_keys(stack: &Stack) -> Vec<Screen> {
    stack
        .snapshot()
        .iter()
        .map(|entry| *entry.key())
        .collect()
}

/// Records `(scope label, completion reason)` pairs in completion order.
fn record_completion(scope: &ManagedScope, log: &Arc<Mutex<Vec<(String, String)>>>) {
    let log = log.clone();
    let label = scope.label().to_string();
    scope
        .invoke_on_completion(move |reason| {
            log.lock()
                .unwrap()
                .push((label, reason.unwrap_or_default().to_string()));
        })
        .detach();
}

fn view(scope: &ManagedScope) -> String {
    format!("view:{}", scope.label())
}

#[test]
fn sequential_pushes_publish_each_change() {
    let host = TestHost::new();
    let stack: Stack = NavStack::new(host.root_scope("nav"), host.handle());
    let start = stack.snapshot_version();

    assert!(stack.push_entry(Screen::Home, view));
    assert!(stack.push_entry(Screen::List, view));
    assert!(stack.push_entry(Screen::Details, view));

    assert_eq!(stack.snapshot_version(), start + 3);
    assert_eq!(
        stack_keys(&stack),
        vec![Screen::Home, Screen::List, Screen::Details]
    );
    assert_eq!(stack.top_key(), Some(Screen::Details));
}

#[test]
fn pop_to_cancels_removed_entries_most_recent_first() {
    let host = TestHost::new();
    let stack: Stack = NavStack::new(host.root_scope("nav"), host.handle());
    stack.push_entry(Screen::Home, view);
    stack.push_entry(Screen::List, view);
    stack.push_entry(Screen::Details, view);

    let log = Arc::new(Mutex::new(Vec::new()));
    for entry in stack.snapshot() {
        record_completion(entry.scope(), &log);
    }

    let before = stack.snapshot_version();
    assert!(stack.pop_to(&Screen::Home, false));
    assert_eq!(stack.snapshot_version(), before + 1);
    assert_eq!(stack_keys(&stack), vec![Screen::Home]);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2);
    assert!(log[0].0.contains("details"));
    assert!(log[1].0.contains("list"));
    for (_, reason) in log.iter() {
        assert!(reason.contains("home"), "reason was {reason:?}");
    }
}

#[test]
fn pop_to_an_absent_key_changes_nothing() {
    let host = TestHost::new();
    let stack: Stack = NavStack::new(host.root_scope("nav"), host.handle());
    stack.push_entry(Screen::Home, view);
    let before = stack.snapshot_version();
    assert!(!stack.pop_to(&Screen::Details, true));
    assert_eq!(stack.snapshot_version(), before);
    assert_eq!(stack.len(), 1);
}

#[test]
fn repushing_the_top_key_is_a_no_op() {
    let host = TestHost::new();
    let stack: Stack = NavStack::new(host.root_scope("nav"), host.handle());
    stack.push_entry(Screen::Home, view);
    let before = stack.snapshot_version();
    assert!(!stack.push_entry(Screen::Home, view));
    assert_eq!(stack.snapshot_version(), before);
    assert_eq!(stack.len(), 1);
}

#[test]
fn pushing_an_existing_key_replaces_and_moves_it_to_the_top() {
    let host = TestHost::new();
    let root = host.root_scope("nav");
    let stack: Stack = NavStack::new(root.clone(), host.handle());
    stack.push_entry(Screen::Home, view);
    stack.push_entry(Screen::List, view);

    let old_home = stack.snapshot()[0].scope().clone();
    let log = Arc::new(Mutex::new(Vec::new()));
    record_completion(&old_home, &log);

    assert!(stack.push_entry(Screen::Home, view));
    assert_eq!(stack_keys(&stack), vec![Screen::List, Screen::Home]);
    assert_eq!(stack.len(), 2);

    assert!(!old_home.is_active());
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert!(log[0].1.contains("replaced by push of home"));

    let new_home = stack.snapshot()[1].scope().clone();
    assert!(new_home.is_active());
    assert_ne!(new_home.handle().serial(), old_home.handle().serial());
}

#[test]
fn transaction_publishes_once_and_defers_cancellation() {
    let host = TestHost::new();
    let root = host.root_scope("nav");
    let stack: Stack = NavStack::new(root.clone(), host.handle());

    let notifications = Arc::new(Mutex::new(0u32));
    let counter = notifications.clone();
    let _watch = stack.watch(move || *counter.lock().unwrap() += 1);

    let details_scope = root.child_scope("details");
    let before = stack.snapshot_version();
    stack.transaction(|| {
        stack.push_entry(Screen::Home, view);
        stack.push_entry(Screen::List, view);
        stack.push(Screen::Details, details_scope.clone(), view);
        stack.pop();
        // inside the batch: nothing published, nothing cancelled yet
        assert_eq!(stack.snapshot_version(), before);
        assert!(details_scope.is_active());
    });

    assert_eq!(stack.snapshot_version(), before + 1);
    assert_eq!(*notifications.lock().unwrap(), 1);
    assert_eq!(stack_keys(&stack), vec![Screen::Home, Screen::List]);
    assert!(!details_scope.is_active());
}

#[test]
fn pushes_onto_a_finished_root_are_dropped() {
    let host = TestHost::new();
    let root = host.root_scope("nav");
    let stack: Stack = NavStack::new(root.clone(), host.handle());
    root.cancel(false, "teardown");
    host.pump();

    let before = stack.snapshot_version();
    assert!(!stack.push_entry(Screen::Home, view));
    assert!(stack.is_empty());
    assert_eq!(stack.snapshot_version(), before);
}

#[test]
fn pushes_with_a_finished_scope_are_dropped() {
    let host = TestHost::new();
    let root = host.root_scope("nav");
    let stack: Stack = NavStack::new(root.clone(), host.handle());

    let dead = root.child_scope("home");
    dead.cancel(false, "never shown");
    assert!(!stack.push(Screen::Home, dead, view));
    assert!(stack.is_empty());
}

#[test]
fn root_teardown_empties_the_stack() {
    let host = TestHost::new();
    let root = host.root_scope("nav");
    let stack: Stack = NavStack::new(root.clone(), host.handle());
    stack.push_entry(Screen::Home, view);
    stack.push_entry(Screen::List, view);

    let scopes: Vec<ManagedScope> = stack
        .snapshot()
        .iter()
        .map(|entry| entry.scope().clone())
        .collect();

    root.cancel(false, "app closing");
    host.pump();

    assert!(stack.is_empty());
    assert!(stack.snapshot().is_empty());
    for scope in scopes {
        assert!(!scope.is_active());
        assert_eq!(
            scope.handle().completion_reason().as_deref(),
            Some("app closing")
        );
    }
}

#[test]
fn an_entry_finishing_on_its_own_is_removed() {
    let host = TestHost::new();
    let stack: Stack = NavStack::new(host.root_scope("nav"), host.handle());
    stack.push_entry(Screen::Home, view);
    stack.push_entry(Screen::List, view);

    let list_scope = stack.snapshot()[1].scope().clone();
    let before = stack.snapshot_version();
    list_scope.handle().complete(None);
    // removal is re-marshaled to the main queue
    assert_eq!(stack.len(), 2);
    host.pump();

    assert_eq!(stack_keys(&stack), vec![Screen::Home]);
    assert_eq!(stack.snapshot_version(), before + 1);
}

#[test]
fn a_replaced_entrys_late_completion_keeps_its_successor() {
    let host = TestHost::new();
    let root = host.root_scope("nav");
    let stack: Stack = NavStack::new(root.clone(), host.handle());
    stack.push_entry(Screen::Home, view);
    stack.push_entry(Screen::List, view);

    // replace home; the displaced scope finishes via deferred cancel
    stack.push_entry(Screen::Home, view);
    host.pump();

    assert_eq!(stack_keys(&stack), vec![Screen::List, Screen::Home]);
    assert!(stack.snapshot()[1].scope().is_active());
}

#[test]
fn redundant_operations_are_silent() {
    let host = TestHost::new();
    let stack: Stack = NavStack::new(host.root_scope("nav"), host.handle());
    let before = stack.snapshot_version();
    assert!(!stack.pop());
    assert!(!stack.remove(&Screen::Home));
    stack.remove_all();
    assert_eq!(stack.snapshot_version(), before);
}

#[test]
fn remove_plucks_a_key_from_the_middle() {
    let host = TestHost::new();
    let stack: Stack = NavStack::new(host.root_scope("nav"), host.handle());
    stack.push_entry(Screen::Home, view);
    stack.push_entry(Screen::List, view);
    stack.push_entry(Screen::Details, view);

    let list_scope = stack.snapshot()[1].scope().clone();
    assert!(stack.remove(&Screen::List));
    assert_eq!(stack_keys(&stack), vec![Screen::Home, Screen::Details]);
    assert!(!list_scope.is_active());
    assert_eq!(
        list_scope.handle().completion_reason().as_deref(),
        Some("removed list")
    );
}

#[test]
fn pop_cancels_with_its_own_reason() {
    let host = TestHost::new();
    let stack: Stack = NavStack::new(host.root_scope("nav"), host.handle());
    stack.push_entry(Screen::Home, view);
    let home_scope = stack.snapshot()[0].scope().clone();

    assert!(stack.pop());
    assert!(stack.is_empty());
    assert_eq!(
        home_scope.handle().completion_reason().as_deref(),
        Some("popped")
    );
}

#[test]
fn views_are_built_from_the_entry_scope() {
    let host = TestHost::new();
    let stack: Stack = NavStack::new(host.root_scope("nav"), host.handle());
    stack.push_entry(Screen::Home, view);
    let entry = &stack.snapshot()[0];
    assert_eq!(entry.view(), &format!("view:{}", entry.scope().label()));
}
