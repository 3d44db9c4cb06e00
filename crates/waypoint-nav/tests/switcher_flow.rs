use std::rc::Rc;
use std::sync::{Arc, Mutex};

use waypoint_core::ManagedScope;
use waypoint_nav::{NavKey, RetainingSwitcher, SlotSwitcher};
use waypoint_testing::TestHost;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum Tab {
    Feed,
    Search,
    Profile,
}

impl NavKey for Tab {
    fn name(&self) -> &str {
        match self {
            Tab::Feed => "feed",
            Tab::Search => "search",
            Tab::Profile => "profile",
        }
    }
}

fn tab_view(tab: &Tab, scope: &ManagedScope) -> String {
    format!("{}@{}", tab.name(), scope.label())
}

#[test]
fn selecting_builds_a_slot_and_publishes() {
    let host = TestHost::new();
    let switcher = SlotSwitcher::new(host.root_scope("tabs"), host.handle(), tab_view);
    let before = switcher.selection_version();

    assert!(switcher.select(Some(Tab::Feed)));
    assert_eq!(switcher.selected(), Some(Tab::Feed));
    assert_eq!(switcher.selection_version(), before + 1);

    let slot = switcher.current_slot().unwrap();
    assert!(slot.view().starts_with("feed@"));
    assert!(slot.scope().is_active());
}

#[test]
fn reselecting_the_current_key_is_a_no_op() {
    let host = TestHost::new();
    let switcher = SlotSwitcher::new(host.root_scope("tabs"), host.handle(), tab_view);
    switcher.select(Some(Tab::Feed));
    let version = switcher.selection_version();
    assert!(!switcher.select(Some(Tab::Feed)));
    assert_eq!(switcher.selection_version(), version);
}

#[test]
fn switching_deferred_cancels_the_outgoing_slot() {
    let host = TestHost::new();
    let switcher = SlotSwitcher::new(host.root_scope("tabs"), host.handle(), tab_view);
    switcher.select(Some(Tab::Feed));
    let feed_scope = switcher.current_slot().unwrap().scope().clone();
    // a live child defers the outgoing slot's termination
    let feed_child = feed_scope.child_scope("player");

    assert!(switcher.select(Some(Tab::Search)));
    assert!(feed_scope.is_active(), "waits for its child");

    feed_child.cancel(false, "player stopped");
    assert!(!feed_scope.is_active());
    assert_eq!(
        feed_scope.handle().completion_reason().as_deref(),
        Some("switched to search")
    );
    assert_eq!(switcher.selected(), Some(Tab::Search));
}

#[test]
fn selecting_none_cancels_immediately() {
    let host = TestHost::new();
    let switcher = SlotSwitcher::new(host.root_scope("tabs"), host.handle(), tab_view);
    switcher.select(Some(Tab::Feed));
    let feed_scope = switcher.current_slot().unwrap().scope().clone();
    let _feed_child = feed_scope.child_scope("player");

    assert!(switcher.select(None));
    // no successor to wait for: the child does not defer anything
    assert!(!feed_scope.is_active());
    assert_eq!(
        feed_scope.handle().completion_reason().as_deref(),
        Some("deselected")
    );
    assert_eq!(switcher.selected(), None);
    assert!(switcher.current_slot().is_none());

    assert!(!switcher.select(None));
}

#[test]
fn selections_on_a_finished_root_are_dropped() {
    let host = TestHost::new();
    let root = host.root_scope("tabs");
    let switcher = SlotSwitcher::new(root.clone(), host.handle(), tab_view);
    root.cancel(false, "teardown");
    host.pump();

    assert!(!switcher.select(Some(Tab::Feed)));
    assert_eq!(switcher.selected(), None);
    assert!(switcher.current_slot().is_none());
}

#[test]
fn root_teardown_clears_the_current_slot() {
    let host = TestHost::new();
    let root = host.root_scope("tabs");
    let switcher = SlotSwitcher::new(root.clone(), host.handle(), tab_view);
    switcher.select(Some(Tab::Feed));
    let feed_scope = switcher.current_slot().unwrap().scope().clone();

    root.cancel(false, "app closing");
    host.pump();

    assert!(!feed_scope.is_active());
    assert_eq!(switcher.selected(), None);
    assert!(switcher.current_slot().is_none());
}

#[test]
fn selection_watchers_fire_on_every_change() {
    let host = TestHost::new();
    let switcher = SlotSwitcher::new(host.root_scope("tabs"), host.handle(), tab_view);
    let hits = Arc::new(Mutex::new(0u32));
    let counter = hits.clone();
    let registration = switcher.watch_selection(move || *counter.lock().unwrap() += 1);

    switcher.select(Some(Tab::Feed));
    switcher.select(Some(Tab::Search));
    switcher.select(None);
    assert_eq!(*hits.lock().unwrap(), 3);

    registration.dispose();
    switcher.select(Some(Tab::Profile));
    assert_eq!(*hits.lock().unwrap(), 3);
}

#[test]
fn retaining_switcher_keeps_every_slot_alive() {
    let host = TestHost::new();
    let switcher = RetainingSwitcher::new(host.root_scope("tabs"), host.handle(), tab_view);

    let feed = switcher.select(Tab::Feed).unwrap();
    let search = switcher.select(Tab::Search).unwrap();
    assert!(feed.scope().is_active());
    assert!(search.scope().is_active());
    assert_eq!(switcher.retained_len(), 2);

    // reselecting resolves to the same slot, not a rebuild
    let feed_again = switcher.select(Tab::Feed).unwrap();
    assert!(Rc::ptr_eq(&feed, &feed_again));
    assert_eq!(switcher.selected(), Some(Tab::Feed));
    assert_eq!(switcher.retained_len(), 2);
}

#[test]
fn retaining_switcher_deselect_keeps_slots() {
    let host = TestHost::new();
    let switcher = RetainingSwitcher::new(host.root_scope("tabs"), host.handle(), tab_view);
    let feed = switcher.select(Tab::Feed).unwrap();

    assert!(switcher.deselect());
    assert_eq!(switcher.selected(), None);
    assert!(feed.scope().is_active());
    assert!(!switcher.deselect());
}

#[test]
fn retaining_switcher_parent_teardown_cancels_all_slots() {
    let host = TestHost::new();
    let root = host.root_scope("tabs");
    let switcher = RetainingSwitcher::new(root.clone(), host.handle(), tab_view);
    let feed = switcher.select(Tab::Feed).unwrap();
    let search = switcher.select(Tab::Search).unwrap();

    root.cancel(false, "app closing");
    host.pump();

    assert!(!feed.scope().is_active());
    assert!(!search.scope().is_active());
    assert_eq!(switcher.retained_len(), 0);
    assert_eq!(switcher.selected(), None);
}

#[test]
fn retaining_selections_on_a_finished_root_are_dropped() {
    let host = TestHost::new();
    let root = host.root_scope("tabs");
    let switcher = RetainingSwitcher::new(root.clone(), host.handle(), tab_view);
    root.cancel(false, "teardown");
    host.pump();

    assert!(switcher.select(Tab::Feed).is_none());
    assert_eq!(switcher.retained_len(), 0);
    assert_eq!(switcher.selected(), None);
}
