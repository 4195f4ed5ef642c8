use crate::{
    entities::commerce::{
        cart::{self, Entity as Cart},
        cart_item::{self, Entity as CartItem},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Who a cart belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartOwner {
    User(Uuid),
    Guest(String),
}

impl CartOwner {
    fn filter(&self) -> sea_orm::sea_query::SimpleExpr {
        match self {
            Self::User(id) => cart::Column::UserId.eq(*id),
            Self::Guest(guest_id) => cart::Column::GuestId.eq(guest_id.clone()),
        }
    }
}

/// Cart contents with a computed total
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub id: Option<Uuid>,
    pub items: Vec<cart_item::Model>,
    pub total_price: Decimal,
}

impl CartView {
    fn empty() -> Self {
        Self {
            id: None,
            items: Vec::new(),
            total_price: Decimal::ZERO,
        }
    }

    fn from_parts(cart: &cart::Model, items: Vec<cart_item::Model>) -> Self {
        let total_price = items
            .iter()
            .map(|item| item.price * Decimal::from(item.quantity))
            .sum::<Decimal>()
            .round_dp(2);
        Self {
            id: Some(cart.id),
            items,
            total_price,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddCartItemInput {
    pub product_id: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub image: Option<String>,
    #[validate(custom = "validate_price")]
    pub price: Decimal,
    pub size: Option<String>,
    pub color: Option<String>,
    #[validate(range(min = 1, max = 99))]
    pub quantity: i32,
}

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if *price >= Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("price");
        err.message = Some("price must not be negative".into());
        Err(err)
    }
}

struct Line {
    product_id: Option<String>,
    name: String,
    image: String,
    price: Decimal,
    size: String,
    color: String,
    quantity: i32,
}

impl From<AddCartItemInput> for Line {
    fn from(input: AddCartItemInput) -> Self {
        Self {
            product_id: input.product_id,
            name: input.name,
            image: input.image.unwrap_or_default(),
            price: input.price,
            size: input.size.unwrap_or_default(),
            color: input.color.unwrap_or_default(),
            quantity: input.quantity,
        }
    }
}

impl From<cart_item::Model> for Line {
    fn from(item: cart_item::Model) -> Self {
        Self {
            product_id: item.product_id,
            name: item.name,
            image: item.image,
            price: item.price,
            size: item.size,
            color: item.color,
            quantity: item.quantity,
        }
    }
}

/// Shopping cart persistence
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    async fn find_cart<C: ConnectionTrait>(
        conn: &C,
        owner: &CartOwner,
    ) -> Result<Option<cart::Model>, ServiceError> {
        Ok(Cart::find()
            .filter(owner.filter())
            .order_by_asc(cart::Column::CreatedAt)
            .one(conn)
            .await?)
    }

    async fn find_or_create_cart<C: ConnectionTrait>(
        conn: &C,
        owner: &CartOwner,
    ) -> Result<cart::Model, ServiceError> {
        if let Some(existing) = Self::find_cart(conn, owner).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let (user_id, guest_id) = match owner {
            CartOwner::User(id) => (Some(*id), None),
            CartOwner::Guest(guest_id) => (None, Some(guest_id.clone())),
        };
        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            guest_id: Set(guest_id),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(cart.insert(conn).await?)
    }

    async fn items_of<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
    ) -> Result<Vec<cart_item::Model>, ServiceError> {
        Ok(CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(conn)
            .await?)
    }

    /// Adds a line, merging quantity into an identical product/size/color line.
    async fn upsert_line<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
        line: Line,
    ) -> Result<(), ServiceError> {
        let mut query = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::Size.eq(line.size.clone()))
            .filter(cart_item::Column::Color.eq(line.color.clone()));
        query = match &line.product_id {
            Some(pid) => query.filter(cart_item::Column::ProductId.eq(pid.clone())),
            None => query.filter(cart_item::Column::Name.eq(line.name.clone())),
        };

        if let Some(existing) = query.one(conn).await? {
            let quantity = existing.quantity.saturating_add(line.quantity);
            let mut active = existing.into_active_model();
            active.quantity = Set(quantity);
            active.update(conn).await?;
        } else {
            cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart_id),
                product_id: Set(line.product_id),
                name: Set(line.name),
                image: Set(line.image),
                price: Set(line.price),
                size: Set(line.size),
                color: Set(line.color),
                quantity: Set(line.quantity),
                created_at: Set(Utc::now()),
            }
            .insert(conn)
            .await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_cart(&self, owner: &CartOwner) -> Result<CartView, ServiceError> {
        match Self::find_cart(&*self.db, owner).await? {
            Some(cart) => {
                let items = Self::items_of(&*self.db, cart.id).await?;
                Ok(CartView::from_parts(&cart, items))
            }
            None => Ok(CartView::empty()),
        }
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn add_item(
        &self,
        owner: &CartOwner,
        input: AddCartItemInput,
    ) -> Result<CartView, ServiceError> {
        input.validate()?;
        let txn = self.db.begin().await?;
        let cart = Self::find_or_create_cart(&txn, owner).await?;
        Self::upsert_line(&txn, cart.id, Line::from(input)).await?;
        let mut touched = cart.clone().into_active_model();
        touched.updated_at = Set(Utc::now());
        touched.update(&txn).await?;
        txn.commit().await?;

        self.get_cart(owner).await
    }

    /// Moves a guest cart's lines into the user's cart and removes the guest cart.
    #[instrument(skip(self))]
    pub async fn merge_guest_cart(
        &self,
        user_id: Uuid,
        guest_id: &str,
    ) -> Result<CartView, ServiceError> {
        let guest = CartOwner::Guest(guest_id.to_string());
        let user = CartOwner::User(user_id);

        let txn = self.db.begin().await?;
        let Some(guest_cart) = Self::find_cart(&txn, &guest).await? else {
            txn.commit().await?;
            return self.get_cart(&user).await;
        };

        let user_cart = Self::find_or_create_cart(&txn, &user).await?;
        let guest_items = Self::items_of(&txn, guest_cart.id).await?;
        let merged = guest_items.len();
        for item in guest_items {
            Self::upsert_line(&txn, user_cart.id, Line::from(item)).await?;
        }

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(guest_cart.id))
            .exec(&txn)
            .await?;
        Cart::delete_by_id(guest_cart.id).exec(&txn).await?;
        txn.commit().await?;

        info!(%user_id, guest_id, merged, "Guest cart merged");
        self.get_cart(&user).await
    }

    /// Deletes every cart (and its lines) owned by the user. Returns the number of carts removed.
    pub async fn clear_for_user<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let carts = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .all(conn)
            .await?;
        if carts.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = carts.iter().map(|c| c.id).collect();
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.is_in(ids.clone()))
            .exec(conn)
            .await?;
        let result = Cart::delete_many()
            .filter(cart::Column::Id.is_in(ids))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let removed = Self::clear_for_user(&*self.db, user_id).await?;
        if removed > 0 {
            self.event_sender
                .send_or_log(Event::CartCleared {
                    user_id,
                    carts: removed,
                })
                .await;
        }
        Ok(removed)
    }
}
