pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;
pub mod user;

pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use payment::Entity as Payment;
pub use product::Entity as Product;
pub use user::Entity as User;
