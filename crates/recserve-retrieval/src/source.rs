//! Recommendation sources and scenarios

use derive_more::Display;
use recserve_common::keys::{
    COLLABORATIVE_RECOMMEND, ITEM_BASED_RECOMMEND, LATEST, NON_PERSONALIZED, OFFLINE_RECOMMEND,
    POPULAR, USER_BASED_RECOMMEND,
};
use recserve_common::{Bucket, Error, Result};
use serde::Serialize;
use std::str::FromStr;

/// Scenario name selecting the configured fallback chain
pub const FALLBACK_SCENARIO: &str = "_";

/// A ranked list recommendations can be drawn from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendSource {
    #[display("offline")]
    Offline,
    #[display("collaborative")]
    Collaborative,
    #[display("item_based")]
    ItemBased,
    #[display("user_based")]
    UserBased,
    #[display("latest")]
    Latest,
    #[display("popular")]
    Popular,
}

impl RecommendSource {
    /// Personalized sources are keyed by user; the others are global.
    #[must_use]
    pub const fn is_personalized(&self) -> bool {
        !matches!(self, Self::Latest | Self::Popular)
    }

    /// Bucket holding this source's candidates for `user_id`.
    #[must_use]
    pub fn bucket(&self, user_id: &str) -> Bucket {
        match self {
            Self::Offline => Bucket::new(OFFLINE_RECOMMEND, user_id),
            Self::Collaborative => Bucket::new(COLLABORATIVE_RECOMMEND, user_id),
            Self::ItemBased => Bucket::new(ITEM_BASED_RECOMMEND, user_id),
            Self::UserBased => Bucket::new(USER_BASED_RECOMMEND, user_id),
            Self::Latest => Bucket::new(NON_PERSONALIZED, LATEST),
            Self::Popular => Bucket::new(NON_PERSONALIZED, POPULAR),
        }
    }
}

impl FromStr for RecommendSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "offline" => Ok(Self::Offline),
            "collaborative" => Ok(Self::Collaborative),
            "item_based" => Ok(Self::ItemBased),
            "user_based" => Ok(Self::UserBased),
            "latest" => Ok(Self::Latest),
            "popular" => Ok(Self::Popular),
            other => Err(Error::invalid_argument(format!(
                "unknown recommendation source {other:?}"
            ))),
        }
    }
}

/// Which sources a recommendation query consults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
    /// One named source alone
    Single(RecommendSource),
    /// The operator-configured fallback chain
    Fallback,
}

impl FromStr for Scenario {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == FALLBACK_SCENARIO {
            Ok(Self::Fallback)
        } else {
            s.parse().map(Self::Single)
        }
    }
}

/// Parse the configured fallback chain, keeping its order.
pub fn parse_chain(names: &[String]) -> Result<Vec<RecommendSource>> {
    names.iter().map(|name| name.parse()).collect()
}
