//! Challenge-response auth endpoints (SPEC_FULL.md §4.10).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use warp::{Filter, Rejection, Reply};

use crate::error::ShardError;
use crate::ids::WalletId;
use crate::world::World;

use super::with_world;

pub fn routes(world: Arc<World>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    challenge(world.clone()).or(verify(world))
}

#[derive(Deserialize)]
struct ChallengeQuery {
    wallet: String,
}

#[derive(Serialize)]
struct ChallengeResponse {
    message: String,
    timestamp: i64,
}

fn challenge(world: Arc<World>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("auth" / "challenge")
        .and(warp::get())
        .and(warp::query::<ChallengeQuery>())
        .and(with_world(world))
        .and_then(|query: ChallengeQuery, world: Arc<World>| async move {
            let challenge = world.sessions.issue_challenge(&WalletId(query.wallet));
            Ok::<_, Rejection>(warp::reply::json(&ChallengeResponse {
                message: challenge.message,
                timestamp: challenge.timestamp,
            }))
        })
}

#[derive(Deserialize)]
struct VerifyRequest {
    wallet: String,
    signature: String,
    timestamp: i64,
}

#[derive(Serialize)]
struct VerifyResponse {
    token: String,
    expires_in_secs: i64,
}

fn verify(world: Arc<World>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("auth" / "verify")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_world(world))
        .and_then(|req: VerifyRequest, world: Arc<World>| async move {
            let wallet = WalletId(req.wallet);
            let (token, expires_in_secs) = world
                .sessions
                .verify(&wallet, &req.signature, req.timestamp)
                .map_err(|e| warp::reject::custom(ShardError::Unauthorized(e.to_string())))?;
            Ok::<_, Rejection>(warp::reply::json(&VerifyResponse { token, expires_in_secs }))
        })
}
