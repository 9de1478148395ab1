use tasty_sample::lifecycle::Site;
use tasty_sample::model::{Entry, EntryCreate, EntryUpdate, Tree, TreeCreate, UserCreate};
use tasty_sample::SiteError;
use tastytopping::TastyError;

fn paths(entries: &[Entry]) -> Vec<&str> {
    entries.iter().map(|e| e.path.as_str()).collect()
}

/// Full run of the site against the in-memory server.
#[test]
fn test_full_site_integration() {
    let site = Site::in_memory().expect("Failed to start site");

    // Users
    let alice = site.users.register(UserCreate::new("alice")).expect("Failed to register");
    let bob = site.users.register(UserCreate::new("bob")).expect("Failed to register");
    let found = site.users.by_username("alice").unwrap().expect("User not found");
    assert_eq!(found.username, "alice");
    assert_eq!(Some(found.uri), alice.peek_uri());
    assert!(site.users.by_username("carol").unwrap().is_none());

    // Trees
    let oak = site.trees.plant(TreeCreate::root("oak")).unwrap();
    let branch = site.trees.plant(TreeCreate::under("branch", &oak)).unwrap();
    let twig = site.trees.plant(TreeCreate::under("twig", &branch)).unwrap();
    site.trees.plant(TreeCreate::under("leaf", &oak)).unwrap();

    let children: Vec<String> = site.trees.children_of(&oak).unwrap().into_iter().map(|t| t.name).collect();
    assert_eq!(children, vec!["branch", "leaf"]);
    assert_eq!(site.trees.deepest().unwrap(), 2);
    assert_eq!(site.trees.depth(&twig).unwrap(), 2);
    assert_eq!(site.trees.depth(&oak).unwrap(), 0);

    let renamed = site.trees.rename(&branch, "bough").unwrap();
    assert_eq!(renamed.name, "bough");
    assert_eq!(renamed.parent, oak.peek_uri());
    assert!(site.trees.find("branch").unwrap().is_none());
    assert_eq!(site.trees.find("bough").unwrap(), Some(branch.clone()));

    // Entries
    let drafts = (1..=6)
        .map(|i| EntryCreate::new(format!("notes/{i}")).rated(i * 15).by(&alice))
        .collect();
    site.entries.publish_all(drafts).unwrap();
    let extra = site.entries.publish(EntryCreate::new("notes/extra").titled("Extra")).unwrap();
    assert_eq!(extra.rating, 50);
    assert_eq!(extra.title.as_deref(), Some("Extra"));
    assert_eq!(extra.author, None);

    let top: Vec<i64> = site.entries.top_rated(3).unwrap().iter().map(|e| e.rating).collect();
    assert_eq!(top, vec![90, 75, 60]);
    assert_eq!(site.entries.top_rated(100).unwrap().len(), 7);

    let written = site.entries.by_author(&alice).unwrap();
    assert_eq!(written.len(), 6);
    assert!(written.iter().all(|e| e.author == alice.peek_uri()));
    assert!(site.entries.by_author(&bob).unwrap().is_empty());

    assert_eq!(paths(&site.entries.page(0, 3).unwrap()), vec!["notes/1", "notes/2", "notes/3"]);
    assert_eq!(paths(&site.entries.page(2, 3).unwrap()), vec!["notes/extra"]);
    assert!(site.entries.page(5, 3).unwrap().is_empty());

    // Housekeeping
    let update = EntryUpdate {
        title: Some("Needs review".into()),
        rating: None,
    };
    assert_eq!(site.entries.revise_below(40, update).unwrap(), 2);
    let low = site.entries.page(0, 1).unwrap();
    assert_eq!(low[0].title.as_deref(), Some("Needs review"));
    assert_eq!(site.entries.purge_below(40).unwrap(), 2);
    assert_eq!(site.entries.total().unwrap(), 5);

    assert!(site.request_count().unwrap() > 0);
    site.shutdown();
}

#[test]
fn felled_trees_stay_gone() {
    let site = Site::in_memory().unwrap();
    let oak = site.trees.plant(TreeCreate::root("oak")).unwrap();
    let acorn = site.trees.plant(TreeCreate::under("acorn", &oak)).unwrap();

    site.trees.fell(&oak).unwrap();
    assert!(site.trees.find("oak").unwrap().is_none());
    assert!(matches!(
        site.trees.depth(&oak),
        Err(SiteError::Api(TastyError::ResourceDeleted { .. }))
    ));

    let orphan = Tree::try_from(&acorn).unwrap();
    assert_eq!(orphan.name, "acorn");
}

#[test]
fn duplicate_names_are_rejected() {
    let site = Site::in_memory().unwrap();
    site.users.register(UserCreate::new("alice")).unwrap();
    let err = site.users.register(UserCreate::new("alice")).unwrap_err();
    assert!(matches!(err, SiteError::Api(_)));
}

#[test]
fn sites_do_not_share_state() {
    let first = Site::in_memory().unwrap();
    let second = Site::in_memory().unwrap();
    first.trees.plant(TreeCreate::root("oak")).unwrap();

    assert!(second.trees.find("oak").unwrap().is_none());
    assert!(second.trees.plant(TreeCreate::root("oak")).is_ok());
}

#[test]
fn clients_fail_after_shutdown() {
    let site = Site::in_memory().unwrap();
    let trees = site.trees.clone();
    site.shutdown();

    let err = trees.find("oak").unwrap_err();
    assert!(matches!(err, SiteError::Api(TastyError::CannotConnectToAddress { .. })));
}

#[test]
fn schema_summary_lists_the_fields() {
    let site = Site::in_memory().unwrap();
    let help = site.trees.describe().unwrap();
    assert!(help.contains("Resource: tree"));
    assert!(help.contains("name"));
    assert!(help.contains("parent"));
}
