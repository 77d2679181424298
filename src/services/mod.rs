pub mod boarding;
pub mod location;
pub mod movement;
pub mod normalize;
pub mod notifications;
