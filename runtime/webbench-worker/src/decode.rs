//! Positional row decoding into aggregate fields.
//!
//! [`FromRow`] reads a fixed run of columns into one value. [`FieldSink`]
//! is a destination field of an aggregate record; its implementation
//! decides whether rows overwrite it (details), extend it (lists), or do
//! both (the flattened user query).

use std::ops::ControlFlow;

use webbench_db::{DecodeError, Row};

use crate::model::{
    MovieDetail, MovieReview, MovieStub, PersonDetail, PersonStub, ReviewAuthor, ReviewedMovie,
    User, UserDetail, UserReview,
};

/// A value decoded from `WIDTH` consecutive columns, starting at column 0.
pub trait FromRow: Sized {
    const WIDTH: usize;

    fn from_row(row: &Row<'_>) -> Result<Self, DecodeError>;
}

/// Destination of one sub-query's rows.
pub trait FieldSink: Send {
    /// Restores the zero value ahead of a new execution. Lists keep their
    /// allocation.
    fn reset(&mut self);

    /// Consumes one row. `Break` means further rows are ignored.
    fn accept(&mut self, row: &Row<'_>) -> Result<ControlFlow<()>, DecodeError>;
}

/// List semantics: every row appends one element.
impl<T: FromRow + Send> FieldSink for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }

    fn accept(&mut self, row: &Row<'_>) -> Result<ControlFlow<()>, DecodeError> {
        row.expect_width(T::WIDTH)?;
        self.push(T::from_row(row)?);
        Ok(ControlFlow::Continue(()))
    }
}

/// Scalar semantics: the first row overwrites the detail, the rest of the
/// result set is ignored, zero rows leave the zero value in place.
macro_rules! detail_sink {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl FieldSink for $ty {
                fn reset(&mut self) {
                    *self = <$ty>::default();
                }

                fn accept(&mut self, row: &Row<'_>) -> Result<ControlFlow<()>, DecodeError> {
                    row.expect_width(<$ty as FromRow>::WIDTH)?;
                    *self = <$ty as FromRow>::from_row(row)?;
                    Ok(ControlFlow::Break(()))
                }
            }
        )+
    };
}

detail_sink!(MovieDetail, PersonDetail);

/// The user query is a join: each row carries the user columns followed by
/// one review. The header is rewritten on every row, the review appended.
impl FieldSink for User {
    fn reset(&mut self) {
        self.detail = UserDetail::default();
        self.latest_reviews.clear();
    }

    fn accept(&mut self, row: &Row<'_>) -> Result<ControlFlow<()>, DecodeError> {
        row.expect_width(UserDetail::WIDTH + UserReview::WIDTH)?;
        self.detail = UserDetail::from_row(row)?;
        let review = row.slice(UserDetail::WIDTH..row.len())?;
        self.latest_reviews.push(UserReview::from_row(&review)?);
        Ok(ControlFlow::Continue(()))
    }
}

impl FromRow for MovieDetail {
    const WIDTH: usize = 6;

    fn from_row(row: &Row<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            id: row.key(0)?,
            image: row.text(1)?,
            title: row.text(2)?,
            year: row.integer(3)?,
            description: row.text(4)?,
            avg_rating: row.real(5)?,
        })
    }
}

impl FromRow for PersonStub {
    const WIDTH: usize = 3;

    fn from_row(row: &Row<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            id: row.key(0)?,
            full_name: row.text(1)?,
            image: row.text(2)?,
        })
    }
}

impl FromRow for ReviewAuthor {
    const WIDTH: usize = 3;

    fn from_row(row: &Row<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            id: row.key(0)?,
            name: row.text(1)?,
            image: row.text(2)?,
        })
    }
}

impl FromRow for MovieReview {
    const WIDTH: usize = 3 + ReviewAuthor::WIDTH;

    fn from_row(row: &Row<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            id: row.key(0)?,
            body: row.text(1)?,
            rating: row.integer(2)?,
            author: ReviewAuthor::from_row(&row.slice(3..Self::WIDTH)?)?,
        })
    }
}

impl FromRow for PersonDetail {
    const WIDTH: usize = 4;

    fn from_row(row: &Row<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            id: row.key(0)?,
            full_name: row.text(1)?,
            image: row.text(2)?,
            bio: row.text(3)?,
        })
    }
}

impl FromRow for MovieStub {
    const WIDTH: usize = 5;

    fn from_row(row: &Row<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            id: row.key(0)?,
            image: row.text(1)?,
            title: row.text(2)?,
            year: row.integer(3)?,
            avg_rating: row.real(4)?,
        })
    }
}

impl FromRow for UserDetail {
    const WIDTH: usize = 3;

    fn from_row(row: &Row<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            id: row.key(0)?,
            name: row.text(1)?,
            image: row.text(2)?,
        })
    }
}

impl FromRow for ReviewedMovie {
    const WIDTH: usize = 4;

    fn from_row(row: &Row<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            id: row.key(0)?,
            image: row.text(1)?,
            title: row.text(2)?,
            avg_rating: row.real(3)?,
        })
    }
}

impl FromRow for UserReview {
    const WIDTH: usize = 3 + ReviewedMovie::WIDTH;

    fn from_row(row: &Row<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            id: row.key(0)?,
            body: row.text(1)?,
            rating: row.integer(2)?,
            movie: ReviewedMovie::from_row(&row.slice(3..Self::WIDTH)?)?,
        })
    }
}
