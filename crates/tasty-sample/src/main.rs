//! # TastyTopping Sample Tour
//!
//! Runs the forestry site against `TASTY_API_URL`, or against the in-memory server
//! when that is unset, and walks through:
//! 1.  Registering a [`User`](tasty_sample::model::User) and planting a small forest.
//! 2.  Publishing entries in bulk and querying them.
//! 3.  Bulk revisions, purges and a delete.

use chrono::NaiveDate;
use tasty_sample::lifecycle::tracing::setup_tracing;
use tasty_sample::lifecycle::Site;
use tasty_sample::model::{EntryCreate, EntryUpdate, TreeCreate, UserCreate};
use tasty_sample::SiteError;
use tracing::{error, info, info_span};

fn main() -> Result<(), String> {
    setup_tracing();

    info!("Starting forestry site tour");
    let site = Site::from_env().map_err(|e| e.to_string())?;

    let result = tour(&site);
    if let Err(e) = &result {
        error!(error = %e, "Tour failed");
    }

    if let Some(requests) = site.request_count() {
        info!(requests, "In-memory server handled requests");
    }
    site.shutdown();
    result.map_err(|e| e.to_string())?;

    info!("Tour completed successfully");
    Ok(())
}

fn tour(site: &Site) -> Result<(), SiteError> {
    let alice = {
        let _span = info_span!("registration").entered();
        site.users.register(UserCreate::new("alice"))?
    };

    {
        let _span = info_span!("planting").entered();
        let oak = site.trees.plant(TreeCreate::root("oak"))?;
        let branch = site.trees.plant(TreeCreate::under("branch", &oak))?;
        site.trees.plant(TreeCreate::under("twig", &branch))?;
        site.trees.plant(TreeCreate::under("leaf", &oak))?;

        let children = site.trees.children_of(&oak)?;
        let names: Vec<&str> = children.iter().map(|t| t.name.as_str()).collect();
        info!(?names, deepest = site.trees.deepest()?, "Forest planted");

        let renamed = site.trees.rename(&branch, "bough")?;
        info!(name = %renamed.name, depth = site.trees.depth(&branch)?, "Branch renamed");
    }

    {
        let _span = info_span!("publishing").entered();
        let spring = NaiveDate::from_ymd_opt(2024, 3, 20).and_then(|d| d.and_hms_opt(9, 30, 0));
        let drafts = (1..=6)
            .map(|i| EntryCreate {
                date: spring,
                ..EntryCreate::new(format!("notes/{i}"))
                    .rated(i * 15)
                    .titled(format!("Field notes {i}"))
                    .by(&alice)
            })
            .collect();
        site.entries.publish_all(drafts)?;
        let single = site.entries.publish(EntryCreate::new("notes/extra"))?;
        info!(path = %single.path, rating = single.rating, "Published with the default rating");

        for entry in site.entries.top_rated(3)? {
            info!(path = %entry.path, rating = entry.rating, "Top rated");
        }
        let written = site.entries.by_author(&alice)?;
        info!(count = written.len(), "Entries written by alice");
        let second_page = site.entries.page(1, 3)?;
        info!(count = second_page.len(), "Second page");
    }

    {
        let _span = info_span!("housekeeping").entered();
        let update = EntryUpdate {
            title: Some("Needs review".into()),
            rating: None,
        };
        site.entries.revise_below(40, update)?;
        site.entries.purge_below(40)?;
        info!(remaining = site.entries.total()?, "Entries after purge");

        if let Some(leaf) = site.trees.find("leaf")? {
            site.trees.fell(&leaf)?;
        }
        info!(found = site.trees.find("leaf")?.is_some(), "Leaf felled");
    }

    Ok(())
}
