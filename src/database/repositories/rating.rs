use crate::database::models::OrphanedRating;
use crate::database::{DatabaseError, Gateway};

pub struct RatingRepository<'a> {
    gateway: &'a Gateway,
}

impl<'a> RatingRepository<'a> {
    pub fn new(gateway: &'a Gateway) -> Self {
        Self { gateway }
    }

    /// Ratings whose image no longer exists. Read only.
    pub fn find_orphaned(&self) -> Result<Vec<OrphanedRating>, DatabaseError> {
        self.gateway.query_all(
            "SELECT Rating.Id AS ratingId, Rating.ImageId AS imageId \
             FROM Rating \
             LEFT JOIN Image ON Image.Id = Rating.ImageId \
             WHERE Image.Id IS NULL \
             ORDER BY Rating.Id",
            [],
            OrphanedRating::from_row,
        )
    }

    pub fn find_by_image(&self, image_id: i64) -> Result<Vec<OrphanedRating>, DatabaseError> {
        self.gateway.query_all(
            "SELECT Id AS ratingId, ImageId AS imageId FROM Rating \
             WHERE ImageId = ?1 ORDER BY Id",
            [image_id],
            OrphanedRating::from_row,
        )
    }
}
