//! Aggregate records and the related-entity stubs embedded in them.
//!
//! Detail structs are flattened into their aggregate so the serialized
//! payload reads as one object per entity.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    #[serde(flatten)]
    pub detail: MovieDetail,
    pub directors: Vec<PersonStub>,
    pub cast: Vec<PersonStub>,
    pub reviews: Vec<MovieReview>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MovieDetail {
    pub id: String,
    pub title: String,
    pub year: i64,
    pub description: String,
    pub image: String,
    pub avg_rating: f64,
}

/// Person summary embedded in a movie's directors and cast lists.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonStub {
    pub id: String,
    pub full_name: String,
    pub image: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MovieReview {
    pub id: String,
    pub body: String,
    pub rating: i64,
    pub author: ReviewAuthor,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewAuthor {
    pub id: String,
    pub name: String,
    pub image: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(flatten)]
    pub detail: PersonDetail,
    pub acted_in: Vec<MovieStub>,
    pub directed: Vec<MovieStub>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonDetail {
    pub id: String,
    pub full_name: String,
    pub image: String,
    pub bio: String,
}

/// Movie summary embedded in a person's filmography lists.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MovieStub {
    pub id: String,
    pub image: String,
    pub title: String,
    pub year: i64,
    pub avg_rating: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(flatten)]
    pub detail: UserDetail,
    pub latest_reviews: Vec<UserReview>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserDetail {
    pub id: String,
    pub name: String,
    pub image: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserReview {
    pub id: String,
    pub body: String,
    pub rating: i64,
    pub movie: ReviewedMovie,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewedMovie {
    pub id: String,
    pub image: String,
    pub title: String,
    pub avg_rating: f64,
}
