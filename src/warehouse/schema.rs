/// Static definition of one warehouse table: DDL plus the column order used
/// when binding insert parameters.
pub struct TableDef {
    pub name: &'static str,
    pub create_sql: &'static str,
    pub insert_sql: &'static str,
    pub columns: &'static [&'static str],
}

pub const CUSTOMER: TableDef = TableDef {
    name: "customer",
    create_sql: "CREATE TABLE customer (
        customer_id INTEGER PRIMARY KEY,
        name TEXT,
        region TEXT,
        join_date TEXT,
        rewards_points INTEGER,
        member_tier TEXT
    )",
    insert_sql: "INSERT INTO customer \
        (customer_id, name, region, join_date, rewards_points, member_tier) \
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    columns: &[
        "customer_id",
        "name",
        "region",
        "join_date",
        "rewards_points",
        "member_tier",
    ],
};

pub const PRODUCT: TableDef = TableDef {
    name: "product",
    create_sql: "CREATE TABLE product (
        product_id INTEGER PRIMARY KEY,
        product_name TEXT,
        category TEXT,
        unit_price REAL,
        condition TEXT
    )",
    insert_sql: "INSERT INTO product \
        (product_id, product_name, category, unit_price, condition) \
        VALUES (?1, ?2, ?3, ?4, ?5)",
    columns: &[
        "product_id",
        "product_name",
        "category",
        "unit_price",
        "condition",
    ],
};

/// Foreign keys are declared for downstream BI tools; enforcement is the
/// loader's orphan policy, not SQLite's.
pub const SALE: TableDef = TableDef {
    name: "sale",
    create_sql: "CREATE TABLE sale (
        sale_id INTEGER PRIMARY KEY,
        customer_id INTEGER,
        product_id INTEGER,
        amount REAL,
        sale_date TEXT,
        payment_type TEXT,
        FOREIGN KEY (customer_id) REFERENCES customer (customer_id),
        FOREIGN KEY (product_id) REFERENCES product (product_id)
    )",
    insert_sql: "INSERT INTO sale \
        (sale_id, customer_id, product_id, amount, sale_date, payment_type) \
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    columns: &[
        "sale_id",
        "customer_id",
        "product_id",
        "amount",
        "sale_date",
        "payment_type",
    ],
};
